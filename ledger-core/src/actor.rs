//! Actor-based concurrency for the ledger
//!
//! One task owns the [`Store`] and the persistence gateway. Every mutation and
//! every read goes through its mailbox, so no two operations ever observe or
//! modify the store at the same time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │  1. validate + compute against the store              │
//! │  2. await PersistenceGateway                          │
//! │  3. on Ok only: apply the same change to the store    │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! A failed gateway call leaves the store exactly as it was.

use crate::{
    differ::{diff_items, ItemDiff},
    gateway::{
        apply_committed_activity_changes, apply_event_changes, apply_flag_update,
        ActivityChanges, EventChanges, FlagUpdate, PersistenceGateway,
    },
    metrics::Metrics,
    settlement::SettlementFlag,
    store::{FriendRequestOutcome, Store, UserDirectory},
    types::{ActivityId, Event, EventId, User, UserId},
    validation::{ActivityDraft, EventDraft, UserProfile},
    Error, Result,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Read-only access to the store, run on the actor task
pub type ReadFn = Box<dyn FnOnce(&Store) + Send>;

/// Which activities a settlement flag write covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagScope {
    /// One activity
    Activity(ActivityId),
    /// Every activity in the event paid for by this creditor
    Creditor(UserId),
}

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Register a user
    RegisterUser {
        profile: UserProfile,
        response: Reply<UserId>,
    },

    /// Replace a user's profile
    UpdateProfile {
        user: UserId,
        profile: UserProfile,
        response: Reply<()>,
    },

    /// Ask another user to be friends
    SendFriendRequest {
        from: UserId,
        to: UserId,
        response: Reply<FriendRequestOutcome>,
    },

    /// Accept or decline a pending request
    RespondToFriendRequest {
        user: UserId,
        requester: UserId,
        accept: bool,
        response: Reply<()>,
    },

    /// Remove a friendship
    RemoveFriend {
        user: UserId,
        other: UserId,
        response: Reply<()>,
    },

    /// Create an event
    CreateEvent {
        creator: UserId,
        draft: EventDraft,
        response: Reply<EventId>,
    },

    /// Edit an event
    UpdateEvent {
        acting: UserId,
        event_id: EventId,
        draft: EventDraft,
        response: Reply<()>,
    },

    /// Delete an event
    DeleteEvent {
        acting: UserId,
        event_id: EventId,
        response: Reply<()>,
    },

    /// Create an activity
    CreateActivity {
        event_id: EventId,
        payee: UserId,
        draft: ActivityDraft,
        response: Reply<ActivityId>,
    },

    /// Edit an activity
    UpdateActivity {
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
        draft: ActivityDraft,
        response: Reply<ItemDiff>,
    },

    /// Delete an activity
    DeleteActivity {
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
        response: Reply<()>,
    },

    /// Bulk settlement flag write
    SetSettlementFlag {
        event_id: EventId,
        scope: FlagScope,
        payer: UserId,
        flag: SettlementFlag,
        value: bool,
        response: Reply<usize>,
    },

    /// Run a read against the store
    Read(ReadFn),

    /// Shutdown actor
    Shutdown { response: oneshot::Sender<()> },
}

impl LedgerMessage {
    fn operation(&self) -> &'static str {
        match self {
            LedgerMessage::RegisterUser { .. } => "register_user",
            LedgerMessage::UpdateProfile { .. } => "update_profile",
            LedgerMessage::SendFriendRequest { .. } => "send_friend_request",
            LedgerMessage::RespondToFriendRequest { .. } => "respond_to_friend_request",
            LedgerMessage::RemoveFriend { .. } => "remove_friend",
            LedgerMessage::CreateEvent { .. } => "create_event",
            LedgerMessage::UpdateEvent { .. } => "update_event",
            LedgerMessage::DeleteEvent { .. } => "delete_event",
            LedgerMessage::CreateActivity { .. } => "create_activity",
            LedgerMessage::UpdateActivity { .. } => "update_activity",
            LedgerMessage::DeleteActivity { .. } => "delete_activity",
            LedgerMessage::SetSettlementFlag { .. } => "set_settlement_flag",
            LedgerMessage::Read(_) => "read",
            LedgerMessage::Shutdown { .. } => "shutdown",
        }
    }
}

impl std::fmt::Debug for LedgerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LedgerMessage").field(&self.operation()).finish()
    }
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// In-memory arena
    store: Store,

    /// Durable storage
    gateway: Arc<dyn PersistenceGateway>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Metrics
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor")
            .field("users", &self.store.user_count())
            .field("events", &self.store.event_count())
            .finish_non_exhaustive()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        store: Store,
        gateway: Arc<dyn PersistenceGateway>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Arc<Metrics>,
    ) -> Self {
        metrics.set_events_loaded(store.event_count());
        Self {
            store,
            gateway,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut shutdown = None;
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown { response } => {
                    shutdown = Some(response);
                    break;
                }
                LedgerMessage::Read(read) => self.run_read(read),
                msg => self.handle_mutation(msg).await,
            }
        }

        tracing::info!("Ledger actor shutting down");
        // Release the gateway (and any database lock) before acknowledging
        drop(self);
        if let Some(response) = shutdown {
            let _ = response.send(());
        }
    }

    /// Run a read job. A panicking job drops its reply sender, so the caller
    /// sees a closed response channel while the actor keeps serving.
    fn run_read(&self, read: ReadFn) {
        let store = &self.store;
        if std::panic::catch_unwind(AssertUnwindSafe(|| read(store))).is_err() {
            self.metrics.record_failure("read", "panic");
            tracing::error!(operation = "read", "Read job panicked; store left unchanged");
        }
    }

    /// Handle a single mutation message
    async fn handle_mutation(&mut self, msg: LedgerMessage) {
        let operation = msg.operation();
        let started = Instant::now();

        macro_rules! reply {
            ($response:expr, $result:expr) => {{
                let result = $result;
                self.record(operation, started, result.as_ref().err());
                let _ = $response.send(result);
            }};
        }

        match msg {
            LedgerMessage::RegisterUser { profile, response } => {
                reply!(response, self.register_user(profile).await)
            }
            LedgerMessage::UpdateProfile {
                user,
                profile,
                response,
            } => reply!(response, self.update_profile(user, profile).await),
            LedgerMessage::SendFriendRequest { from, to, response } => {
                reply!(response, self.send_friend_request(from, to).await)
            }
            LedgerMessage::RespondToFriendRequest {
                user,
                requester,
                accept,
                response,
            } => reply!(
                response,
                self.respond_to_friend_request(user, requester, accept).await
            ),
            LedgerMessage::RemoveFriend {
                user,
                other,
                response,
            } => reply!(response, self.remove_friend(user, other).await),
            LedgerMessage::CreateEvent {
                creator,
                draft,
                response,
            } => reply!(response, self.create_event(creator, draft).await),
            LedgerMessage::UpdateEvent {
                acting,
                event_id,
                draft,
                response,
            } => reply!(response, self.update_event(acting, event_id, draft).await),
            LedgerMessage::DeleteEvent {
                acting,
                event_id,
                response,
            } => reply!(response, self.delete_event(acting, event_id).await),
            LedgerMessage::CreateActivity {
                event_id,
                payee,
                draft,
                response,
            } => reply!(response, self.create_activity(event_id, payee, draft).await),
            LedgerMessage::UpdateActivity {
                acting,
                event_id,
                activity_id,
                draft,
                response,
            } => reply!(
                response,
                self.update_activity(acting, event_id, activity_id, draft).await
            ),
            LedgerMessage::DeleteActivity {
                acting,
                event_id,
                activity_id,
                response,
            } => reply!(
                response,
                self.delete_activity(acting, event_id, activity_id).await
            ),
            LedgerMessage::SetSettlementFlag {
                event_id,
                scope,
                payer,
                flag,
                value,
                response,
            } => reply!(
                response,
                self.set_settlement_flag(event_id, scope, payer, flag, value)
                    .await
            ),
            LedgerMessage::Read(_) | LedgerMessage::Shutdown { .. } => {
                // Handled in run loop
            }
        }
    }

    fn record(&self, operation: &'static str, started: Instant, error: Option<&Error>) {
        match error {
            None => {
                self.metrics
                    .record_mutation(operation, started.elapsed().as_secs_f64());
                self.metrics.set_events_loaded(self.store.event_count());
                tracing::info!(operation, "Mutation committed");
            }
            Some(Error::Persistence(reason)) => {
                self.metrics.record_failure(operation, "persistence");
                tracing::error!(operation, reason = %reason, "Mutation not persisted");
            }
            Some(e) => {
                self.metrics.record_failure(operation, "rejected");
                tracing::warn!(operation, error = %e, "Mutation rejected");
            }
        }
    }

    // Users

    async fn register_user(&mut self, profile: UserProfile) -> Result<UserId> {
        let profile = profile.validate()?;
        self.ensure_email_free(&profile.email, None)?;

        let user = self
            .gateway
            .create_user(profile)
            .await
            .map_err(persistence_failure)?;
        let id = user.id;
        self.store.insert_user(user);
        Ok(id)
    }

    async fn update_profile(&mut self, user: UserId, profile: UserProfile) -> Result<()> {
        let profile = profile.validate()?;
        self.ensure_email_free(&profile.email, Some(user))?;

        let mut updated = self.store.resolve(user)?.clone();
        updated.display_name = profile.display_name;
        updated.email = profile.email;
        updated.phone_number = profile.phone_number;

        self.save_users(vec![updated]).await
    }

    fn ensure_email_free(&self, email: &str, owner: Option<UserId>) -> Result<()> {
        match self.store.user_by_email(email) {
            Some(existing) if Some(existing.id) != owner => Err(Error::InvalidInput(format!(
                "Email {} is already registered",
                email
            ))),
            _ => Ok(()),
        }
    }

    async fn send_friend_request(
        &mut self,
        from: UserId,
        to: UserId,
    ) -> Result<FriendRequestOutcome> {
        let (outcome, users) = self.store.plan_friend_request(from, to)?;
        self.save_users(users).await?;
        Ok(outcome)
    }

    async fn respond_to_friend_request(
        &mut self,
        user: UserId,
        requester: UserId,
        accept: bool,
    ) -> Result<()> {
        let users = self.store.plan_friend_response(user, requester, accept)?;
        self.save_users(users).await
    }

    async fn remove_friend(&mut self, user: UserId, other: UserId) -> Result<()> {
        let users = self.store.plan_unfriend(user, other)?;
        self.save_users(users).await
    }

    async fn save_users(&mut self, users: Vec<User>) -> Result<()> {
        self.gateway
            .save_users(&users)
            .await
            .map_err(persistence_failure)?;
        for user in users {
            self.store.insert_user(user);
        }
        Ok(())
    }

    // Events

    async fn create_event(&mut self, creator: UserId, draft: EventDraft) -> Result<EventId> {
        self.store.resolve(creator)?;
        let draft = draft.validate(creator, &self.store)?;

        let event = self
            .gateway
            .create_event(creator, &draft)
            .await
            .map_err(persistence_failure)?;
        let id = event.id;
        tracing::debug!(event_id = %id, participants = event.participants.len(), "Event created");
        self.store.insert_event(event);
        Ok(id)
    }

    async fn update_event(
        &mut self,
        acting: UserId,
        event_id: EventId,
        draft: EventDraft,
    ) -> Result<()> {
        let event = self.store.event(event_id)?;
        ensure_creator(event, acting)?;
        let draft = draft.validate(event.creator, &self.store)?;

        let remove_participants: Vec<UserId> = event
            .participants
            .iter()
            .copied()
            .filter(|id| !draft.participants.contains(id))
            .collect();
        let add_participants: Vec<UserId> = draft
            .participants
            .iter()
            .copied()
            .filter(|id| !event.participants.contains(id))
            .collect();

        // Removing someone who still appears in an activity would orphan their debts
        if let Some(busy) = remove_participants
            .iter()
            .find(|id| event.activities.iter().any(|a| a.payee == **id || a.has_payer(**id)))
        {
            return Err(Error::InvalidInput(format!(
                "User {} still has activities in event {}",
                busy, event_id
            )));
        }

        let changes = EventChanges {
            event_id,
            name: draft.name,
            date: draft.date,
            add_participants,
            remove_participants,
        };
        self.gateway
            .update_event(&changes)
            .await
            .map_err(persistence_failure)?;
        apply_event_changes(self.store.event_mut(event_id)?, &changes);
        Ok(())
    }

    async fn delete_event(&mut self, acting: UserId, event_id: EventId) -> Result<()> {
        ensure_creator(self.store.event(event_id)?, acting)?;

        self.gateway
            .delete_event(event_id)
            .await
            .map_err(persistence_failure)?;
        self.store.remove_event(event_id);
        Ok(())
    }

    // Activities

    async fn create_activity(
        &mut self,
        event_id: EventId,
        payee: UserId,
        draft: ActivityDraft,
    ) -> Result<ActivityId> {
        self.store.resolve(payee)?;
        let event = self.store.event(event_id)?;
        ensure_member(event, payee)?;
        let draft = draft.validate(payee, &self.store)?;
        ensure_payers_in_event(event, &draft)?;

        let activity = self
            .gateway
            .create_activity(event_id, payee, &draft)
            .await
            .map_err(persistence_failure)?;
        let id = activity.id;
        tracing::debug!(
            event_id = %event_id,
            activity_id = %id,
            items = activity.items.len(),
            "Activity created"
        );
        self.store.event_mut(event_id)?.activities.push(activity);
        Ok(id)
    }

    async fn update_activity(
        &mut self,
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
        draft: ActivityDraft,
    ) -> Result<ItemDiff> {
        let event = self.store.event(event_id)?;
        let activity = event
            .activity(activity_id)
            .ok_or(Error::ActivityNotFound(activity_id))?;
        if activity.payee != acting {
            return Err(Error::NotPermitted(format!(
                "Only the payee can edit activity {}",
                activity_id
            )));
        }
        let draft = draft.validate(activity.payee, &self.store)?;
        ensure_payers_in_event(event, &draft)?;

        let diff = diff_items(&activity.items, &draft.items);
        let fields_unchanged = activity.name == draft.name
            && activity.gratuity == draft.gratuity
            && activity.add_five_percent_tax == draft.add_five_percent_tax;
        if diff.is_empty() && fields_unchanged {
            tracing::debug!(activity_id = %activity_id, "Activity edit is a no-op");
            return Ok(diff);
        }

        let changes = ActivityChanges {
            event_id,
            activity_id,
            name: draft.name,
            gratuity: draft.gratuity,
            add_five_percent_tax: draft.add_five_percent_tax,
            items_to_add: diff.to_add.clone(),
            items_to_remove: diff.to_remove.clone(),
        };
        let added = self
            .gateway
            .update_activity(&changes)
            .await
            .map_err(persistence_failure)?;

        tracing::debug!(
            activity_id = %activity_id,
            added = added.len(),
            removed = changes.items_to_remove.len(),
            kept = diff.unchanged.len(),
            "Activity items reconciled"
        );
        let activity = self.store.activity_mut(event_id, activity_id)?;
        apply_committed_activity_changes(activity, &changes, &added);
        Ok(diff)
    }

    async fn delete_activity(
        &mut self,
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
    ) -> Result<()> {
        let event = self.store.event(event_id)?;
        ensure_member(event, acting)?;
        event
            .activity(activity_id)
            .ok_or(Error::ActivityNotFound(activity_id))?;

        self.gateway
            .delete_activity(event_id, activity_id)
            .await
            .map_err(persistence_failure)?;
        self.store
            .event_mut(event_id)?
            .activities
            .retain(|a| a.id != activity_id);
        Ok(())
    }

    // Settlement

    async fn set_settlement_flag(
        &mut self,
        event_id: EventId,
        scope: FlagScope,
        payer: UserId,
        flag: SettlementFlag,
        value: bool,
    ) -> Result<usize> {
        self.store.resolve(payer)?;
        let event = self.store.event(event_id)?;

        let activity_ids: Vec<ActivityId> = match scope {
            FlagScope::Activity(activity_id) => {
                let activity = event
                    .activity(activity_id)
                    .ok_or(Error::ActivityNotFound(activity_id))?;
                if activity.has_payer(payer) {
                    vec![activity_id]
                } else {
                    Vec::new()
                }
            }
            FlagScope::Creditor(creditor) => {
                self.store.resolve(creditor)?;
                event
                    .activities
                    .iter()
                    .filter(|a| a.payee == creditor && a.has_payer(payer))
                    .map(|a| a.id)
                    .collect()
            }
        };

        if activity_ids.is_empty() {
            return Err(Error::InvalidInput(format!(
                "User {} owes nothing in the selected activities",
                payer
            )));
        }

        let update = FlagUpdate {
            event_id,
            activity_ids,
            payer,
            flag,
            value,
        };
        self.gateway
            .set_settlement_flag(&update)
            .await
            .map_err(persistence_failure)?;

        let touched = apply_flag_update(self.store.event_mut(event_id)?, &update);
        tracing::debug!(
            event_id = %event_id,
            payer = %payer,
            flag = %flag,
            value,
            touched,
            "Settlement flag written"
        );
        Ok(touched)
    }
}

fn ensure_creator(event: &Event, acting: UserId) -> Result<()> {
    if event.creator != acting {
        return Err(Error::NotPermitted(format!(
            "Only the creator can change event {}",
            event.id
        )));
    }
    Ok(())
}

fn ensure_member(event: &Event, user: UserId) -> Result<()> {
    if !event.involves(user) {
        return Err(Error::NotPermitted(format!(
            "User {} is not part of event {}",
            user, event.id
        )));
    }
    Ok(())
}

fn ensure_payers_in_event(event: &Event, draft: &ActivityDraft) -> Result<()> {
    for item in &draft.items {
        if let Some(outsider) = item.payers.keys().find(|id| !event.involves(**id)) {
            return Err(Error::InvalidInput(format!(
                "User {} is not part of event {}",
                outsider, event.id
            )));
        }
    }
    Ok(())
}

/// Collapse any gateway error into a persistence failure
fn persistence_failure(err: Error) -> Error {
    match err {
        Error::Persistence(_) => err,
        other => Error::Persistence(other.to_string()),
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> LedgerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Run `read` against the store on the actor task
    pub(crate) async fn read<T, F>(&self, read: F) -> Result<T>
    where
        F: FnOnce(&Store) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: ReadFn = Box::new(move |store| {
            let _ = tx.send(read(store));
        });
        self.sender
            .send(LedgerMessage::Read(job))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Register a user
    pub async fn register_user(&self, profile: UserProfile) -> Result<UserId> {
        self.request(|response| LedgerMessage::RegisterUser { profile, response })
            .await
    }

    /// Replace a user's profile
    pub async fn update_profile(&self, user: UserId, profile: UserProfile) -> Result<()> {
        self.request(|response| LedgerMessage::UpdateProfile {
            user,
            profile,
            response,
        })
        .await
    }

    /// Send a friend request
    pub async fn send_friend_request(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<FriendRequestOutcome> {
        self.request(|response| LedgerMessage::SendFriendRequest { from, to, response })
            .await
    }

    /// Answer a friend request
    pub async fn respond_to_friend_request(
        &self,
        user: UserId,
        requester: UserId,
        accept: bool,
    ) -> Result<()> {
        self.request(|response| LedgerMessage::RespondToFriendRequest {
            user,
            requester,
            accept,
            response,
        })
        .await
    }

    /// Remove a friendship
    pub async fn remove_friend(&self, user: UserId, other: UserId) -> Result<()> {
        self.request(|response| LedgerMessage::RemoveFriend {
            user,
            other,
            response,
        })
        .await
    }

    /// Create an event
    pub async fn create_event(&self, creator: UserId, draft: EventDraft) -> Result<EventId> {
        self.request(|response| LedgerMessage::CreateEvent {
            creator,
            draft,
            response,
        })
        .await
    }

    /// Edit an event
    pub async fn update_event(
        &self,
        acting: UserId,
        event_id: EventId,
        draft: EventDraft,
    ) -> Result<()> {
        self.request(|response| LedgerMessage::UpdateEvent {
            acting,
            event_id,
            draft,
            response,
        })
        .await
    }

    /// Delete an event
    pub async fn delete_event(&self, acting: UserId, event_id: EventId) -> Result<()> {
        self.request(|response| LedgerMessage::DeleteEvent {
            acting,
            event_id,
            response,
        })
        .await
    }

    /// Create an activity
    pub async fn create_activity(
        &self,
        event_id: EventId,
        payee: UserId,
        draft: ActivityDraft,
    ) -> Result<ActivityId> {
        self.request(|response| LedgerMessage::CreateActivity {
            event_id,
            payee,
            draft,
            response,
        })
        .await
    }

    /// Edit an activity
    pub async fn update_activity(
        &self,
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
        draft: ActivityDraft,
    ) -> Result<ItemDiff> {
        self.request(|response| LedgerMessage::UpdateActivity {
            acting,
            event_id,
            activity_id,
            draft,
            response,
        })
        .await
    }

    /// Delete an activity
    pub async fn delete_activity(
        &self,
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
    ) -> Result<()> {
        self.request(|response| LedgerMessage::DeleteActivity {
            acting,
            event_id,
            activity_id,
            response,
        })
        .await
    }

    /// Write a settlement flag in bulk
    pub async fn set_settlement_flag(
        &self,
        event_id: EventId,
        scope: FlagScope,
        payer: UserId,
        flag: SettlementFlag,
        value: bool,
    ) -> Result<usize> {
        self.request(|response| LedgerMessage::SetSettlementFlag {
            event_id,
            scope,
            payer,
            flag,
            value,
            response,
        })
        .await
    }

    /// Shutdown actor, waiting for it to stop
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Shutdown { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }
}

/// Spawn the ledger actor over a hydrated store
pub fn spawn_ledger_actor(
    store: Store,
    gateway: Arc<dyn PersistenceGateway>,
    mailbox_capacity: usize,
    metrics: Arc<Metrics>,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = LedgerActor::new(store, gateway, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::ProposedItem;
    use crate::memory::MemoryGateway;
    use chrono::Utc;
    use rust_decimal::Decimal;

    async fn setup() -> (LedgerHandle, Arc<MemoryGateway>, Arc<Metrics>) {
        let gateway = Arc::new(MemoryGateway::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let handle = spawn_ledger_actor(Store::default(), gateway.clone(), 16, metrics.clone());
        (handle, gateway, metrics)
    }

    async fn user(handle: &LedgerHandle, name: &str) -> UserId {
        handle
            .register_user(UserProfile::new(name, format!("{}@example.com", name.to_lowercase())))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _, _) = setup().await;
        handle.shutdown().await.unwrap();
        assert!(matches!(
            handle.read(|store| store.user_count()).await,
            Err(Error::Concurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (handle, _, metrics) = setup().await;
        user(&handle, "Alice").await;

        let result = handle
            .register_user(UserProfile::new("Other", "ALICE@example.com"))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(metrics.failures("register_user", "rejected"), 1);
        assert_eq!(metrics.mutations("register_user"), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_store_untouched() {
        let (handle, gateway, metrics) = setup().await;
        let alice = user(&handle, "Alice").await;
        let bob = user(&handle, "Bob").await;
        let event_id = handle
            .create_event(alice, EventDraft::new("Trip", Utc::now(), vec![bob]))
            .await
            .unwrap();

        gateway.fail_next_writes(1);
        let draft = ActivityDraft::new("Dinner").with_item(
            ProposedItem::new("Pizza", Decimal::from(20), false).with_payer(bob, Decimal::from(20)),
        );
        let result = handle.create_activity(event_id, alice, draft).await;
        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(metrics.failures("create_activity", "persistence"), 1);

        let activities = handle
            .read(move |store| store.event(event_id).map(|e| e.activities.len()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(activities, 0);
    }

    #[tokio::test]
    async fn test_only_payee_may_edit_activity() {
        let (handle, _, _) = setup().await;
        let alice = user(&handle, "Alice").await;
        let bob = user(&handle, "Bob").await;
        let event_id = handle
            .create_event(alice, EventDraft::new("Trip", Utc::now(), vec![bob]))
            .await
            .unwrap();
        let draft = ActivityDraft::new("Dinner").with_item(
            ProposedItem::new("Pizza", Decimal::from(20), false).with_payer(bob, Decimal::from(20)),
        );
        let activity_id = handle
            .create_activity(event_id, alice, draft.clone())
            .await
            .unwrap();

        let result = handle.update_activity(bob, event_id, activity_id, draft).await;
        assert!(matches!(result, Err(Error::NotPermitted(_))));
    }

    #[tokio::test]
    async fn test_unchanged_edit_skips_gateway() {
        let (handle, gateway, _) = setup().await;
        let alice = user(&handle, "Alice").await;
        let bob = user(&handle, "Bob").await;
        let event_id = handle
            .create_event(alice, EventDraft::new("Trip", Utc::now(), vec![bob]))
            .await
            .unwrap();
        let draft = ActivityDraft::new("Dinner").with_item(
            ProposedItem::new("Pizza", Decimal::from(20), false).with_payer(bob, Decimal::from(20)),
        );
        let activity_id = handle
            .create_activity(event_id, alice, draft.clone())
            .await
            .unwrap();

        let writes = gateway.committed_writes();
        let diff = handle
            .update_activity(alice, event_id, activity_id, draft)
            .await
            .unwrap();
        assert!(diff.is_empty());
        assert_eq!(gateway.committed_writes(), writes);
    }

    #[tokio::test]
    async fn test_flag_write_for_non_payer_rejected() {
        let (handle, _, _) = setup().await;
        let alice = user(&handle, "Alice").await;
        let bob = user(&handle, "Bob").await;
        let carol = user(&handle, "Carol").await;
        let event_id = handle
            .create_event(alice, EventDraft::new("Trip", Utc::now(), vec![bob, carol]))
            .await
            .unwrap();
        let draft = ActivityDraft::new("Dinner").with_item(
            ProposedItem::new("Pizza", Decimal::from(20), false).with_payer(bob, Decimal::from(20)),
        );
        let activity_id = handle.create_activity(event_id, alice, draft).await.unwrap();

        let result = handle
            .set_settlement_flag(
                event_id,
                FlagScope::Activity(activity_id),
                carol,
                SettlementFlag::HasPaid,
                true,
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let touched = handle
            .set_settlement_flag(
                event_id,
                FlagScope::Creditor(alice),
                bob,
                SettlementFlag::HasPaid,
                true,
            )
            .await
            .unwrap();
        assert_eq!(touched, 1);
    }

    #[tokio::test]
    async fn test_panicking_read_does_not_stop_actor() {
        let (handle, _, metrics) = setup().await;

        let result = handle
            .read(|_store| -> usize { panic!("read job failed") })
            .await;
        assert!(matches!(result, Err(Error::Concurrency(_))));
        assert_eq!(metrics.failures("read", "panic"), 1);

        // Mailbox still open, reads and writes keep working
        let alice = user(&handle, "Alice").await;
        assert_eq!(handle.read(|store| store.user_count()).await.unwrap(), 1);
        assert!(handle.read(move |store| store.resolve(alice).is_ok()).await.unwrap());
        handle.shutdown().await.unwrap();
    }
}
