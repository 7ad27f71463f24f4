//! Tab Ledger
//!
//! Shared-expense ledger: events hold activities paid for by one user, each
//! activity holds items whose cost is pre-split between payers. The ledger
//! applies tax and gratuity, tracks settlement, and nets debts pairwise.
//!
//! # Architecture
//!
//! - **Arena**: users and events live in a [`Store`] keyed by id; every
//!   reference to a person is a [`UserId`]
//! - **Single Writer**: one actor task owns the store and the persistence
//!   gateway, so concurrent callers never race
//! - **Persist, then apply**: the store changes only after the gateway commits
//! - **Exact money**: [`rust_decimal::Decimal`] throughout, rounded only in
//!   [`summary`]
//!
//! # Invariants
//!
//! - The payee's own share never counts as debt
//! - `net(a, b) == -net(b, a)` for every pair
//! - Confirmed shares leave the ledger
//! - A failed write leaves the in-memory ledger untouched

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod amortization;
pub mod settlement;
pub mod netting;
pub mod differ;
pub mod validation;
pub mod store;
pub mod gateway;
pub mod memory;
pub mod storage;
pub mod actor;
pub mod ledger;
pub mod summary;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use config::Config;
pub use differ::{diff_items, ItemDiff, ProposedItem};
pub use error::{Error, Result};
pub use gateway::PersistenceGateway;
pub use ledger::Ledger;
pub use memory::MemoryGateway;
pub use settlement::{SettlementCheck, SettlementFlag};
pub use storage::RocksStorage;
pub use store::{FriendRequestOutcome, Snapshot, Store, UserDirectory};
pub use summary::{ActivitySummary, EventSummary};
pub use types::{
    Activity, ActivityId, ActivityItem, Event, EventId, Gratuity, ItemId, ItemPayer, User, UserId,
};
pub use validation::{ActivityDraft, EventDraft, UserProfile};
