//! In-process persistence gateway
//!
//! Keeps its own tables, separate from the actor's store, so a ledger can be
//! reopened against the same gateway and rehydrate. Writes can be made to fail
//! or to stall, which tests use to exercise rollback and concurrent callers.

use crate::{
    gateway::{
        apply_activity_changes, apply_event_changes, apply_flag_update, materialize_activity,
        ActivityChanges, EventChanges, FlagUpdate, PersistenceGateway, Sequences,
    },
    store::Snapshot,
    types::{Activity, ActivityId, ActivityItem, Event, EventId, User, UserId},
    validation::{ActivityDraft, EventDraft, UserProfile},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    events: BTreeMap<EventId, Event>,
    seq: Sequences,
}

impl Tables {
    fn event_mut(&mut self, id: EventId) -> Result<&mut Event> {
        self.events.get_mut(&id).ok_or(Error::EventNotFound(id))
    }
}

/// Gateway backed by in-memory tables
#[derive(Debug, Default)]
pub struct MemoryGateway {
    tables: Mutex<Tables>,
    fail_next: AtomicUsize,
    fail_all: AtomicBool,
    write_delay: Option<Duration>,
    committed: AtomicU64,
}

impl MemoryGateway {
    /// Empty gateway
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway pre-populated with a snapshot
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let gateway = Self::new();
        {
            let mut tables = gateway.tables.lock();
            tables.seq = Sequences::covering(&snapshot);
            tables.users = snapshot.users.into_iter().map(|u| (u.id, u)).collect();
            tables.events = snapshot.events.into_iter().map(|e| (e.id, e)).collect();
        }
        gateway
    }

    /// Sleep before every write, so concurrent callers overlap
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every write until switched off
    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Number of writes that committed
    pub fn committed_writes(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Run `op` against a copy of the tables and swap it in on success
    async fn write<T, F>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T> + Send,
        T: Send,
    {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        if self.injected_failure() {
            return Err(Error::Persistence(format!("injected failure in {}", name)));
        }

        let mut tables = self.tables.lock();
        let mut working = tables.clone();
        let result = op(&mut working)?;
        *tables = working;
        self.committed.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn load_all(&self) -> Result<Snapshot> {
        let tables = self.tables.lock();
        Ok(Snapshot {
            users: tables.users.values().cloned().collect(),
            events: tables.events.values().cloned().collect(),
        })
    }

    async fn create_user(&self, user: UserProfile) -> Result<User> {
        self.write("create_user", move |t| {
            let id = t.seq.next_user();
            let mut stored = User::new(id, user.display_name, user.email);
            stored.phone_number = user.phone_number;
            t.users.insert(id, stored.clone());
            Ok(stored)
        })
        .await
    }

    async fn save_users(&self, users: &[User]) -> Result<()> {
        self.write("save_users", |t| {
            for user in users {
                if !t.users.contains_key(&user.id) {
                    return Err(Error::InvalidReference(user.id));
                }
                t.users.insert(user.id, user.clone());
            }
            Ok(())
        })
        .await
    }

    async fn create_event(&self, creator: UserId, draft: &EventDraft) -> Result<Event> {
        self.write("create_event", |t| {
            let event = Event {
                id: t.seq.next_event(),
                name: draft.name.clone(),
                date: draft.date,
                creator,
                participants: draft.participants.clone(),
                activities: Vec::new(),
            };
            t.events.insert(event.id, event.clone());
            Ok(event)
        })
        .await
    }

    async fn update_event(&self, changes: &EventChanges) -> Result<()> {
        self.write("update_event", |t| {
            apply_event_changes(t.event_mut(changes.event_id)?, changes);
            Ok(())
        })
        .await
    }

    async fn delete_event(&self, event_id: EventId) -> Result<()> {
        self.write("delete_event", |t| {
            t.events
                .remove(&event_id)
                .map(|_| ())
                .ok_or(Error::EventNotFound(event_id))
        })
        .await
    }

    async fn create_activity(
        &self,
        event_id: EventId,
        payee: UserId,
        draft: &ActivityDraft,
    ) -> Result<Activity> {
        self.write("create_activity", |t| {
            let Tables { events, seq, .. } = t;
            let event = events.get_mut(&event_id).ok_or(Error::EventNotFound(event_id))?;
            let activity = materialize_activity(seq, event_id, payee, draft);
            event.activities.push(activity.clone());
            Ok(activity)
        })
        .await
    }

    async fn update_activity(&self, changes: &ActivityChanges) -> Result<Vec<ActivityItem>> {
        self.write("update_activity", |t| {
            let Tables { events, seq, .. } = t;
            let activity = events
                .get_mut(&changes.event_id)
                .ok_or(Error::EventNotFound(changes.event_id))?
                .activity_mut(changes.activity_id)
                .ok_or(Error::ActivityNotFound(changes.activity_id))?;
            Ok(apply_activity_changes(seq, activity, changes))
        })
        .await
    }

    async fn delete_activity(&self, event_id: EventId, activity_id: ActivityId) -> Result<()> {
        self.write("delete_activity", |t| {
            let event = t.event_mut(event_id)?;
            let before = event.activities.len();
            event.activities.retain(|a| a.id != activity_id);
            if event.activities.len() == before {
                return Err(Error::ActivityNotFound(activity_id));
            }
            Ok(())
        })
        .await
    }

    async fn set_settlement_flag(&self, update: &FlagUpdate) -> Result<()> {
        self.write("set_settlement_flag", |t| {
            apply_flag_update(t.event_mut(update.event_id)?, update);
            Ok(())
        })
        .await
    }
}
