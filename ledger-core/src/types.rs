//! Core types for the ledger
//!
//! The entity graph is a tree: an [`Event`] owns its [`Activity`] list, an
//! activity owns its [`ActivityItem`]s and each item owns its [`ItemPayer`]
//! entries. Every reference to a person is a [`UserId`] resolved through the
//! user directory, and back references (item to activity, activity to event)
//! are plain ids. Money is always [`Decimal`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw integer value
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// User identifier
    UserId
);
define_id!(
    /// Event identifier
    EventId
);
define_id!(
    /// Activity identifier
    ActivityId
);
define_id!(
    /// Activity item identifier
    ItemId
);

/// A person known to the ledger.
///
/// Relationship lists are social data only; they never influence debts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Name shown to friends and co-participants
    pub display_name: String,
    /// Email (unique, case-insensitive)
    pub email: String,
    /// Optional phone number, shown to payers of this user's activities
    pub phone_number: Option<String>,
    /// Accepted friends
    #[serde(default)]
    pub friends: Vec<UserId>,
    /// Users who asked to befriend this user
    #[serde(default)]
    pub incoming_friend_requests: Vec<UserId>,
    /// Users this user asked to befriend
    #[serde(default)]
    pub outgoing_friend_requests: Vec<UserId>,
}

impl User {
    /// Create a user with no relationships
    pub fn new(id: UserId, display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            email: email.into(),
            phone_number: None,
            friends: Vec::new(),
            incoming_friend_requests: Vec::new(),
            outgoing_friend_requests: Vec::new(),
        }
    }

    /// Is `other` an accepted friend
    pub fn is_friend(&self, other: UserId) -> bool {
        self.friends.contains(&other)
    }
}

/// A group expense session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event id
    pub id: EventId,
    /// Event name
    pub name: String,
    /// Date the event took place on
    pub date: DateTime<Utc>,
    /// User who created the event
    pub creator: UserId,
    /// Invited participants (the creator is implied)
    pub participants: Vec<UserId>,
    /// Expenses recorded under the event
    pub activities: Vec<Activity>,
}

impl Event {
    /// Find an activity by id
    pub fn activity(&self, id: ActivityId) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    /// Find an activity by id, mutably
    pub fn activity_mut(&mut self, id: ActivityId) -> Option<&mut Activity> {
        self.activities.iter_mut().find(|a| a.id == id)
    }

    /// Is the user the creator or a listed participant
    pub fn involves(&self, user: UserId) -> bool {
        self.creator == user || self.participants.contains(&user)
    }

    /// Every counterpart of `user` for debt purposes: participants plus the
    /// creator, deduplicated, excluding `user`.
    pub fn counterparts(&self, user: UserId) -> Vec<UserId> {
        let mut others: Vec<UserId> = Vec::with_capacity(self.participants.len() + 1);
        for id in self.participants.iter().copied().chain(std::iter::once(self.creator)) {
            if id != user && !others.contains(&id) {
                others.push(id);
            }
        }
        others
    }
}

/// Gratuity added on top of an activity's costs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gratuity {
    /// Percentage of each payer's subtotal (10 means 10%)
    Percent(Decimal),
    /// Fixed amount shared evenly between all distinct payers
    Flat(Decimal),
}

impl Gratuity {
    /// No gratuity
    pub const NONE: Gratuity = Gratuity::Flat(Decimal::ZERO);

    /// Is the gratuity a percentage
    pub fn is_percent(&self) -> bool {
        matches!(self, Gratuity::Percent(_))
    }

    /// Raw configured amount (percent or currency)
    pub fn amount(&self) -> Decimal {
        match self {
            Gratuity::Percent(amount) | Gratuity::Flat(amount) => *amount,
        }
    }
}

impl Default for Gratuity {
    fn default() -> Self {
        Gratuity::NONE
    }
}

/// One payee-funded expense within an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity id
    pub id: ActivityId,
    /// Owning event
    pub event_id: EventId,
    /// Activity name
    pub name: String,
    /// User who paid and is owed
    pub payee: UserId,
    /// Gratuity configuration
    pub gratuity: Gratuity,
    /// Add 5% tax on top of each payer's subtotal
    pub add_five_percent_tax: bool,
    /// Line items
    pub items: Vec<ActivityItem>,
}

impl Activity {
    /// All payer entries across every item
    pub fn payer_entries(&self) -> impl Iterator<Item = &ItemPayer> {
        self.items.iter().flat_map(|item| item.payers.iter())
    }

    /// All payer entries across every item, mutably
    pub fn payer_entries_mut(&mut self) -> impl Iterator<Item = &mut ItemPayer> {
        self.items.iter_mut().flat_map(|item| item.payers.iter_mut())
    }

    /// Payer entries that can carry debt (the payee's own share never does)
    pub fn debtor_entries(&self) -> impl Iterator<Item = &ItemPayer> {
        let payee = self.payee;
        self.payer_entries().filter(move |p| p.payer != payee)
    }

    /// Sum of item costs before tax and gratuity
    pub fn subtotal(&self) -> crate::error::Result<Decimal> {
        crate::amortization::checked_sum(self.items.iter().map(|item| item.cost), "subtotal")
    }
}

/// A single line cost within an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    /// Item id
    pub id: ItemId,
    /// Owning activity
    pub activity_id: ActivityId,
    /// Item name
    pub name: String,
    /// Item cost before tax and gratuity
    pub cost: Decimal,
    /// Informational: the caller split the cost evenly
    pub split_evenly: bool,
    /// Pre-allocated shares
    pub payers: Vec<ItemPayer>,
}

/// A user's share of one item and its settlement flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPayer {
    /// User owing the share
    pub payer: UserId,
    /// Share of the item cost, before tax and gratuity
    pub amount_owing: Decimal,
    /// Payer claims to have paid
    pub has_paid: bool,
    /// Payee confirmed receipt; the share leaves the ledger
    pub payment_confirmed: bool,
}

impl ItemPayer {
    /// New unsettled share
    pub fn new(payer: UserId, amount_owing: Decimal) -> Self {
        Self {
            payer,
            amount_owing,
            has_paid: false,
            payment_confirmed: false,
        }
    }
}
