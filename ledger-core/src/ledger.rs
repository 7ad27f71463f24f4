//! Public ledger API
//!
//! Ties the store, the persistence gateway and the writer actor together.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use tab_ledger::{ActivityDraft, Config, EventDraft, Gratuity, Ledger, ProposedItem};
//!
//! #[tokio::main]
//! async fn main() -> tab_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::in_memory()).await?;
//!
//!     let alice = ledger.register_user("Alice", "alice@example.com").await?;
//!     let bob = ledger.register_user("Bob", "bob@example.com").await?;
//!     let trip = ledger
//!         .create_event(alice, EventDraft::new("Trip", chrono::Utc::now(), vec![bob]))
//!         .await?;
//!
//!     let dinner = ActivityDraft::new("Dinner")
//!         .with_gratuity(Gratuity::Percent(Decimal::from(10)))
//!         .with_item(ProposedItem::new("Pizza", Decimal::from(60), false).with_payer(bob, Decimal::from(60)));
//!     ledger.create_activity(trip, alice, dinner).await?;
//!
//!     assert_eq!(ledger.net_amount_between(trip, alice, bob).await?, Decimal::from(66));
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, FlagScope, LedgerHandle},
    config::StorageBackend,
    differ::ItemDiff,
    gateway::PersistenceGateway,
    memory::MemoryGateway,
    metrics::Metrics,
    settlement::{SettlementCheck, SettlementFlag},
    storage::RocksStorage,
    store::{FriendRequestOutcome, Snapshot, Store, UserDirectory},
    summary::{round_amount, ActivitySummary, EventSummary},
    types::{Activity, ActivityId, Event, EventId, User, UserId},
    validation::{ActivityDraft, EventDraft, UserProfile},
    Config, Error, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Main ledger interface
#[derive(Clone, Debug)]
pub struct Ledger {
    /// Actor handle
    handle: LedgerHandle,

    /// Metrics shared with the actor
    metrics: Arc<Metrics>,

    /// Configuration
    config: Arc<Config>,
}

impl Ledger {
    /// Open the ledger on the backend named in `config`
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let gateway: Arc<dyn PersistenceGateway> = match config.storage.backend {
            StorageBackend::Rocksdb => Arc::new(RocksStorage::open(&config)?),
            StorageBackend::Memory => Arc::new(MemoryGateway::new()),
        };
        Self::with_gateway(config, gateway).await
    }

    /// Open the ledger over an existing gateway, hydrating from it
    pub async fn with_gateway(config: Config, gateway: Arc<dyn PersistenceGateway>) -> Result<Self> {
        let snapshot = gateway.load_all().await?;
        tracing::info!(
            service = %config.service_name,
            users = snapshot.users.len(),
            events = snapshot.events.len(),
            "Ledger hydrated"
        );

        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?,
        );
        let handle = spawn_ledger_actor(
            Store::from_snapshot(snapshot),
            gateway,
            config.actor.mailbox_capacity,
            metrics.clone(),
        );

        Ok(Self {
            handle,
            metrics,
            config: Arc::new(config),
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn check(&self) -> SettlementCheck {
        self.config.settlement.check
    }

    fn round(&self, amount: Decimal) -> Decimal {
        round_amount(amount, self.config.presentation.decimal_places)
    }

    // Users

    /// Register a user; the email must not be taken
    pub async fn register_user(
        &self,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<UserId> {
        self.register_profile(UserProfile::new(display_name, email)).await
    }

    /// Register a user from a full profile
    pub async fn register_profile(&self, profile: UserProfile) -> Result<UserId> {
        self.handle.register_user(profile).await
    }

    /// Replace a user's name, email and phone number
    pub async fn update_profile(&self, user: UserId, profile: UserProfile) -> Result<()> {
        self.handle.update_profile(user, profile).await
    }

    /// Ask `to` to be friends with `from`.
    ///
    /// If `to` already asked `from`, both become friends immediately.
    pub async fn send_friend_request(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<FriendRequestOutcome> {
        self.handle.send_friend_request(from, to).await
    }

    /// Accept or decline the pending request `requester` sent to `user`
    pub async fn respond_to_friend_request(
        &self,
        user: UserId,
        requester: UserId,
        accept: bool,
    ) -> Result<()> {
        self.handle
            .respond_to_friend_request(user, requester, accept)
            .await
    }

    /// End a friendship
    pub async fn remove_friend(&self, user: UserId, other: UserId) -> Result<()> {
        self.handle.remove_friend(user, other).await
    }

    /// Look up a user
    pub async fn user(&self, id: UserId) -> Result<User> {
        self.handle
            .read(move |store| store.resolve(id).cloned())
            .await?
    }

    // Events

    /// Create an event owned by `creator`
    pub async fn create_event(&self, creator: UserId, draft: EventDraft) -> Result<EventId> {
        self.handle.create_event(creator, draft).await
    }

    /// Rename, redate or change the participants of an event; creator only
    pub async fn update_event(
        &self,
        acting: UserId,
        event_id: EventId,
        draft: EventDraft,
    ) -> Result<()> {
        self.handle.update_event(acting, event_id, draft).await
    }

    /// Delete an event with everything in it; creator only
    pub async fn delete_event(&self, acting: UserId, event_id: EventId) -> Result<()> {
        self.handle.delete_event(acting, event_id).await
    }

    /// Look up an event
    pub async fn event(&self, id: EventId) -> Result<Event> {
        self.handle
            .read(move |store| store.event(id).cloned())
            .await?
    }

    /// Events `user` created or takes part in
    pub async fn user_events(&self, user: UserId) -> Result<Vec<Event>> {
        self.handle
            .read(move |store| {
                store.resolve(user)?;
                Ok(store.user_events(user).into_iter().cloned().collect())
            })
            .await?
    }

    // Activities

    /// Record an expense paid for by `payee`
    pub async fn create_activity(
        &self,
        event_id: EventId,
        payee: UserId,
        draft: ActivityDraft,
    ) -> Result<ActivityId> {
        self.handle.create_activity(event_id, payee, draft).await
    }

    /// Replace an activity's fields and item list; payee only.
    ///
    /// Items that did not change are kept as they are, settlement flags
    /// included.
    pub async fn update_activity(
        &self,
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
        draft: ActivityDraft,
    ) -> Result<ItemDiff> {
        self.handle
            .update_activity(acting, event_id, activity_id, draft)
            .await
    }

    /// Delete an activity; any member of the event may do so
    pub async fn delete_activity(
        &self,
        acting: UserId,
        event_id: EventId,
        activity_id: ActivityId,
    ) -> Result<()> {
        self.handle
            .delete_activity(acting, event_id, activity_id)
            .await
    }

    /// Look up an activity
    pub async fn activity(&self, event_id: EventId, activity_id: ActivityId) -> Result<Activity> {
        self.handle
            .read(move |store| store.activity(event_id, activity_id).cloned())
            .await?
    }

    // Settlement

    /// Mark every share of `payer` in the activity as claimed paid (or not)
    pub async fn set_has_paid(
        &self,
        event_id: EventId,
        activity_id: ActivityId,
        payer: UserId,
        value: bool,
    ) -> Result<usize> {
        self.handle
            .set_settlement_flag(
                event_id,
                FlagScope::Activity(activity_id),
                payer,
                SettlementFlag::HasPaid,
                value,
            )
            .await
    }

    /// Mark every share of `payer` in the activity as confirmed (or not)
    pub async fn set_payment_confirmed(
        &self,
        event_id: EventId,
        activity_id: ActivityId,
        payer: UserId,
        value: bool,
    ) -> Result<usize> {
        self.handle
            .set_settlement_flag(
                event_id,
                FlagScope::Activity(activity_id),
                payer,
                SettlementFlag::PaymentConfirmed,
                value,
            )
            .await
    }

    /// Write `flag` on every share `payer` has in activities paid for by
    /// `creditor` across the event
    pub async fn settle_with_creditor(
        &self,
        event_id: EventId,
        creditor: UserId,
        payer: UserId,
        flag: SettlementFlag,
        value: bool,
    ) -> Result<usize> {
        self.handle
            .set_settlement_flag(event_id, FlagScope::Creditor(creditor), payer, flag, value)
            .await
    }

    /// Has `payer` claimed payment on everything owed to `creditor` in the event
    pub async fn has_payer_settled_debt(
        &self,
        event_id: EventId,
        creditor: UserId,
        payer: UserId,
    ) -> Result<bool> {
        let check = self.check();
        self.handle
            .read(move |store| {
                Ok(store
                    .event(event_id)?
                    .has_payer_settled_debt(creditor, payer, check))
            })
            .await?
    }

    /// Has `creditor` confirmed every payment from `payer` in the event
    pub async fn has_creditor_confirmed_payments(
        &self,
        event_id: EventId,
        creditor: UserId,
        payer: UserId,
    ) -> Result<bool> {
        let check = self.check();
        self.handle
            .read(move |store| {
                Ok(store
                    .event(event_id)?
                    .has_creditor_confirmed_payments(creditor, payer, check))
            })
            .await?
    }

    // Queries

    /// Net amount `b` owes `a` in the event; negative when `a` owes `b`
    pub async fn net_amount_between(&self, event_id: EventId, a: UserId, b: UserId) -> Result<Decimal> {
        let net = self
            .handle
            .read(move |store| {
                store.resolve_all(&[a, b])?;
                store.event(event_id)?.net_amount_between(a, b)
            })
            .await??;
        Ok(self.round(net))
    }

    /// Total the event's members owe `user`, net of what `user` owes them
    pub async fn user_total_owed(&self, event_id: EventId, user: UserId) -> Result<Decimal> {
        let total = self
            .handle
            .read(move |store| {
                store.resolve(user)?;
                store.event(event_id)?.user_total_owed(user)
            })
            .await??;
        Ok(self.round(total))
    }

    /// Total `user` owes the event's members, net of what they owe `user`
    pub async fn user_total_owing(&self, event_id: EventId, user: UserId) -> Result<Decimal> {
        let total = self
            .handle
            .read(move |store| {
                store.resolve(user)?;
                store.event(event_id)?.user_total_owing(user)
            })
            .await??;
        Ok(self.round(total))
    }

    /// The event as `viewer` sees it
    pub async fn event_summary(&self, event_id: EventId, viewer: UserId) -> Result<EventSummary> {
        let check = self.check();
        let places = self.config.presentation.decimal_places;
        self.handle
            .read(move |store| {
                store.resolve(viewer)?;
                let event = store.event(event_id)?;
                ensure_viewer(event, viewer)?;
                EventSummary::build(event, viewer, store, check, places)
            })
            .await?
    }

    /// The activity as `viewer` sees it
    pub async fn activity_summary(
        &self,
        event_id: EventId,
        activity_id: ActivityId,
        viewer: UserId,
    ) -> Result<ActivitySummary> {
        let places = self.config.presentation.decimal_places;
        self.handle
            .read(move |store| {
                store.resolve(viewer)?;
                ensure_viewer(store.event(event_id)?, viewer)?;
                let activity = store.activity(event_id, activity_id)?;
                ActivitySummary::build(activity, viewer, store, places)
            })
            .await?
    }

    /// Copy of everything the ledger holds in memory
    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.handle.read(|store| store.snapshot()).await
    }

    /// Stop the writer task; queued messages ahead of the shutdown still run
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down ledger");
        self.handle.shutdown().await
    }
}

fn ensure_viewer(event: &Event, viewer: UserId) -> Result<()> {
    if !event.involves(viewer) {
        return Err(Error::NotPermitted(format!(
            "User {} is not part of event {}",
            viewer, event.id
        )));
    }
    Ok(())
}
