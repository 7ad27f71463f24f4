//! Persistence gateway contract
//!
//! The actor computes every change synchronously, hands it to a gateway and
//! only touches its in-memory store once the gateway reports success. Every
//! gateway call is all-or-nothing and gateways assign all ids.

use crate::{
    differ::ProposedItem,
    settlement::SettlementFlag,
    store::Snapshot,
    types::{
        Activity, ActivityId, ActivityItem, Event, EventId, Gratuity, ItemId, ItemPayer, User,
        UserId,
    },
    validation::{ActivityDraft, EventDraft, UserProfile},
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Changes to an event's own fields and participant list
#[derive(Debug, Clone, PartialEq)]
pub struct EventChanges {
    /// Event being edited
    pub event_id: EventId,
    /// New name
    pub name: String,
    /// New date
    pub date: DateTime<Utc>,
    /// Participants to add
    pub add_participants: Vec<UserId>,
    /// Participants to remove
    pub remove_participants: Vec<UserId>,
}

/// Changes to an activity produced by the item differ
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityChanges {
    /// Owning event
    pub event_id: EventId,
    /// Activity being edited
    pub activity_id: ActivityId,
    /// New name
    pub name: String,
    /// New gratuity
    pub gratuity: Gratuity,
    /// New tax flag
    pub add_five_percent_tax: bool,
    /// Items with no stored counterpart
    pub items_to_add: Vec<ProposedItem>,
    /// Stored items with no proposed counterpart
    pub items_to_remove: Vec<ItemId>,
}

/// A bulk flag write across one or more activities of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagUpdate {
    /// Owning event
    pub event_id: EventId,
    /// Activities to update
    pub activity_ids: Vec<ActivityId>,
    /// Payer whose entries change
    pub payer: UserId,
    /// Flag to write
    pub flag: SettlementFlag,
    /// New value
    pub value: bool,
}

/// Durable storage for the ledger
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Load every user and fully hydrated event
    async fn load_all(&self) -> Result<Snapshot>;

    /// Store a new user, assigning its id
    async fn create_user(&self, user: UserProfile) -> Result<User>;

    /// Overwrite users (profile edits, relationship changes)
    async fn save_users(&self, users: &[User]) -> Result<()>;

    /// Store a new event for `creator`, assigning its id
    async fn create_event(&self, creator: UserId, draft: &EventDraft) -> Result<Event>;

    /// Apply event field and participant changes
    async fn update_event(&self, changes: &EventChanges) -> Result<()>;

    /// Delete an event and everything under it
    async fn delete_event(&self, event_id: EventId) -> Result<()>;

    /// Store a new activity, assigning activity and item ids
    async fn create_activity(
        &self,
        event_id: EventId,
        payee: UserId,
        draft: &ActivityDraft,
    ) -> Result<Activity>;

    /// Apply activity field changes and the item diff.
    ///
    /// Returns the newly stored items, in the order they were proposed.
    async fn update_activity(&self, changes: &ActivityChanges) -> Result<Vec<ActivityItem>>;

    /// Delete an activity
    async fn delete_activity(&self, event_id: EventId, activity_id: ActivityId) -> Result<()>;

    /// Write a settlement flag on every entry of the payer in the listed activities
    async fn set_settlement_flag(&self, update: &FlagUpdate) -> Result<()>;
}

/// Id counters handed out by gateways
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    user: i64,
    event: i64,
    activity: i64,
    item: i64,
}

impl Sequences {
    /// Counters that continue after every id present in `snapshot`
    pub fn covering(snapshot: &Snapshot) -> Self {
        let activities = || snapshot.events.iter().flat_map(|e| e.activities.iter());
        Self {
            user: snapshot.users.iter().map(|u| u.id.get()).max().unwrap_or(0),
            event: snapshot.events.iter().map(|e| e.id.get()).max().unwrap_or(0),
            activity: activities().map(|a| a.id.get()).max().unwrap_or(0),
            item: activities()
                .flat_map(|a| a.items.iter())
                .map(|i| i.id.get())
                .max()
                .unwrap_or(0),
        }
    }

    /// Next user id
    pub fn next_user(&mut self) -> UserId {
        self.user += 1;
        UserId(self.user)
    }

    /// Next event id
    pub fn next_event(&mut self) -> EventId {
        self.event += 1;
        EventId(self.event)
    }

    /// Next activity id
    pub fn next_activity(&mut self) -> ActivityId {
        self.activity += 1;
        ActivityId(self.activity)
    }

    /// Next item id
    pub fn next_item(&mut self) -> ItemId {
        self.item += 1;
        ItemId(self.item)
    }
}

/// Build a stored item from a proposal. Payer entries follow the proposal's
/// key order and start unsettled.
pub fn materialize_item(id: ItemId, activity_id: ActivityId, proposed: &ProposedItem) -> ActivityItem {
    ActivityItem {
        id,
        activity_id,
        name: proposed.name.clone(),
        cost: proposed.cost,
        split_evenly: proposed.split_evenly,
        payers: proposed
            .payers
            .iter()
            .map(|(payer, amount)| ItemPayer::new(*payer, *amount))
            .collect(),
    }
}

/// Build a stored activity from a validated draft, drawing ids from `seq`
pub fn materialize_activity(
    seq: &mut Sequences,
    event_id: EventId,
    payee: UserId,
    draft: &ActivityDraft,
) -> Activity {
    let id = seq.next_activity();
    let items = draft
        .items
        .iter()
        .map(|item| materialize_item(seq.next_item(), id, item))
        .collect();

    Activity {
        id,
        event_id,
        name: draft.name.clone(),
        payee,
        gratuity: draft.gratuity,
        add_five_percent_tax: draft.add_five_percent_tax,
        items,
    }
}

/// Apply a change set to a stored activity, drawing new item ids from `seq`.
///
/// Returns the added items.
pub fn apply_activity_changes(
    seq: &mut Sequences,
    activity: &mut Activity,
    changes: &ActivityChanges,
) -> Vec<ActivityItem> {
    let added: Vec<ActivityItem> = changes
        .items_to_add
        .iter()
        .map(|item| materialize_item(seq.next_item(), activity.id, item))
        .collect();
    apply_committed_activity_changes(activity, changes, &added);
    added
}

/// Apply a change set whose new items have already been stored
pub fn apply_committed_activity_changes(
    activity: &mut Activity,
    changes: &ActivityChanges,
    added: &[ActivityItem],
) {
    activity.name = changes.name.clone();
    activity.gratuity = changes.gratuity;
    activity.add_five_percent_tax = changes.add_five_percent_tax;
    activity
        .items
        .retain(|item| !changes.items_to_remove.contains(&item.id));
    activity.items.extend(added.iter().cloned());
}

/// Apply participant and field changes to an event
pub fn apply_event_changes(event: &mut Event, changes: &EventChanges) {
    event.name = changes.name.clone();
    event.date = changes.date;
    event
        .participants
        .retain(|id| !changes.remove_participants.contains(id));
    for id in &changes.add_participants {
        if !event.participants.contains(id) {
            event.participants.push(*id);
        }
    }
}

/// Apply a flag update to an event. Returns entries touched.
pub fn apply_flag_update(event: &mut Event, update: &FlagUpdate) -> usize {
    event
        .activities
        .iter_mut()
        .filter(|a| update.activity_ids.contains(&a.id))
        .map(|a| a.set_flag(update.payer, update.flag, update.value))
        .sum()
}
