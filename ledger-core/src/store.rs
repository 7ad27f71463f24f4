//! In-memory arena of users and events
//!
//! The store is owned by exactly one task (see [`crate::actor`]). Every
//! mutation helper here is applied only after the persistence gateway has
//! committed the same change.

use crate::{
    types::{Activity, ActivityId, Event, EventId, User, UserId},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// id to user lookup
pub trait UserDirectory {
    /// Look up a user
    fn user(&self, id: UserId) -> Option<&User>;

    /// Look up a user, failing with [`Error::InvalidReference`]
    fn resolve(&self, id: UserId) -> Result<&User> {
        self.user(id).ok_or(Error::InvalidReference(id))
    }

    /// Resolve every id, failing on the first unknown one
    fn resolve_all(&self, ids: &[UserId]) -> Result<Vec<&User>> {
        ids.iter().map(|id| self.resolve(*id)).collect()
    }
}

/// Fully hydrated ledger contents as loaded from persistence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// All users
    pub users: Vec<User>,
    /// All events with their activities
    pub events: Vec<Event>,
}

/// Result of sending a friend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FriendRequestOutcome {
    /// Request recorded and waiting for the recipient
    Sent,
    /// The recipient had already asked; both are now friends
    Accepted,
}

/// Arena of users and events keyed by id
#[derive(Debug, Clone, Default)]
pub struct Store {
    users: BTreeMap<UserId, User>,
    events: BTreeMap<EventId, Event>,
}

impl UserDirectory for Store {
    fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }
}

impl Store {
    /// Build the arena from a persisted snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            users: snapshot.users.into_iter().map(|u| (u.id, u)).collect(),
            events: snapshot.events.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    /// Copy the arena out
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            users: self.users.values().cloned().collect(),
            events: self.events.values().cloned().collect(),
        }
    }

    /// Number of users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    // Users

    /// Insert or replace a user
    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    /// Find a user by email, ignoring case
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
    }

    /// Relationship changes for `from` asking to befriend `to`
    pub fn plan_friend_request(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<(FriendRequestOutcome, Vec<User>)> {
        if from == to {
            return Err(Error::InvalidInput("Cannot befriend yourself".to_string()));
        }
        let sender = self.resolve(from)?;
        let recipient = self.resolve(to)?;

        if sender.is_friend(to) {
            return Err(Error::InvalidInput(format!(
                "Users {} and {} are already friends",
                from, to
            )));
        }

        // A reciprocal pending request turns into an acceptance
        if recipient.outgoing_friend_requests.contains(&from) {
            let users = self.plan_friend_response(from, to, true)?;
            return Ok((FriendRequestOutcome::Accepted, users));
        }

        let mut sender = sender.clone();
        let mut recipient = recipient.clone();
        push_unique(&mut sender.outgoing_friend_requests, to);
        push_unique(&mut recipient.incoming_friend_requests, from);

        Ok((FriendRequestOutcome::Sent, vec![sender, recipient]))
    }

    /// Relationship changes for `user` answering a pending request from `requester`
    pub fn plan_friend_response(
        &self,
        user: UserId,
        requester: UserId,
        accept: bool,
    ) -> Result<Vec<User>> {
        let mut responder = self.resolve(user)?.clone();
        let mut asker = self.resolve(requester)?.clone();

        if !responder.incoming_friend_requests.contains(&requester) {
            return Err(Error::InvalidInput(format!(
                "No pending friend request from user {}",
                requester
            )));
        }

        for (this, other) in [(&mut responder, requester), (&mut asker, user)] {
            this.incoming_friend_requests.retain(|id| *id != other);
            this.outgoing_friend_requests.retain(|id| *id != other);
            if accept {
                push_unique(&mut this.friends, other);
            }
        }

        Ok(vec![responder, asker])
    }

    /// Relationship changes for `user` unfriending `other`
    pub fn plan_unfriend(&self, user: UserId, other: UserId) -> Result<Vec<User>> {
        let mut first = self.resolve(user)?.clone();
        let mut second = self.resolve(other)?.clone();

        if !first.is_friend(other) {
            return Err(Error::InvalidInput(format!(
                "Users {} and {} are not friends",
                user, other
            )));
        }

        first.friends.retain(|id| *id != other);
        second.friends.retain(|id| *id != user);
        Ok(vec![first, second])
    }

    // Events

    /// Look up an event
    pub fn event(&self, id: EventId) -> Result<&Event> {
        self.events.get(&id).ok_or(Error::EventNotFound(id))
    }

    /// Look up an event, mutably
    pub fn event_mut(&mut self, id: EventId) -> Result<&mut Event> {
        self.events.get_mut(&id).ok_or(Error::EventNotFound(id))
    }

    /// Look up an activity within an event
    pub fn activity(&self, event_id: EventId, activity_id: ActivityId) -> Result<&Activity> {
        self.event(event_id)?
            .activity(activity_id)
            .ok_or(Error::ActivityNotFound(activity_id))
    }

    /// Look up an activity within an event, mutably
    pub fn activity_mut(
        &mut self,
        event_id: EventId,
        activity_id: ActivityId,
    ) -> Result<&mut Activity> {
        self.event_mut(event_id)?
            .activity_mut(activity_id)
            .ok_or(Error::ActivityNotFound(activity_id))
    }

    /// Insert or replace an event
    pub fn insert_event(&mut self, event: Event) {
        self.events.insert(event.id, event);
    }

    /// Remove an event and everything under it
    pub fn remove_event(&mut self, id: EventId) -> Option<Event> {
        self.events.remove(&id)
    }

    /// Events the user created or participates in
    pub fn user_events(&self, user: UserId) -> Vec<&Event> {
        self.events.values().filter(|e| e.involves(user)).collect()
    }
}

fn push_unique(list: &mut Vec<UserId>, id: UserId) {
    if !list.contains(&id) {
        list.push(id);
    }
}
