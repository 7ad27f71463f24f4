//! Settlement state tracking
//!
//! Each (item, payer) entry carries two independent flags:
//!
//! - `has_paid`: the payer claims to have paid
//! - `payment_confirmed`: the payee confirmed receipt; the entry no longer
//!   counts towards any net debt
//!
//! Flags are written in bulk per payer across a whole activity.
//!
//! # Aggregate checks
//!
//! The historical behaviour of "has this payer repaid the activity" required
//! *every* entry of the activity to belong to the payer and be flagged, so any
//! activity shared by two payers answered `false` for both. That behaviour is
//! kept as [`SettlementCheck::LiteralAllEntries`]. The default,
//! [`SettlementCheck::PayerEntries`], only inspects the named payer's entries
//! (vacuously true when the payer has none in that activity).

use crate::types::{Activity, Event, ItemPayer, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which settlement flag an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementFlag {
    /// Payer claims payment was made
    HasPaid,
    /// Payee confirmed receipt
    PaymentConfirmed,
}

impl fmt::Display for SettlementFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementFlag::HasPaid => write!(f, "has_paid"),
            SettlementFlag::PaymentConfirmed => write!(f, "payment_confirmed"),
        }
    }
}

/// How per-activity settlement predicates are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementCheck {
    /// Only the named payer's entries must carry the flag
    #[default]
    PayerEntries,
    /// Every entry of the activity must belong to the payer and carry the flag
    LiteralAllEntries,
}

impl ItemPayer {
    /// Read a flag
    pub fn flag(&self, flag: SettlementFlag) -> bool {
        match flag {
            SettlementFlag::HasPaid => self.has_paid,
            SettlementFlag::PaymentConfirmed => self.payment_confirmed,
        }
    }

    /// Write a flag
    pub fn set_flag(&mut self, flag: SettlementFlag, value: bool) {
        match flag {
            SettlementFlag::HasPaid => self.has_paid = value,
            SettlementFlag::PaymentConfirmed => self.payment_confirmed = value,
        }
    }
}

impl Activity {
    /// Set `flag` on every entry of `payer` across the activity.
    ///
    /// Returns the number of entries touched.
    pub fn set_flag(&mut self, payer: UserId, flag: SettlementFlag, value: bool) -> usize {
        let mut touched = 0;
        for entry in self.payer_entries_mut().filter(|p| p.payer == payer) {
            entry.set_flag(flag, value);
            touched += 1;
        }
        touched
    }

    /// Mark every entry of `payer` as claimed-paid (or not)
    pub fn set_has_paid(&mut self, payer: UserId, value: bool) -> usize {
        self.set_flag(payer, SettlementFlag::HasPaid, value)
    }

    /// Mark every entry of `payer` as confirmed (or not)
    pub fn set_payment_confirmed(&mut self, payer: UserId, value: bool) -> usize {
        self.set_flag(payer, SettlementFlag::PaymentConfirmed, value)
    }

    /// Does the payer owe anything on this activity
    pub fn has_payer(&self, payer: UserId) -> bool {
        self.debtor_entries().any(|p| p.payer == payer)
    }

    /// Evaluate `flag` for `payer` under `check`
    pub fn payer_flag_settled(
        &self,
        payer: UserId,
        flag: SettlementFlag,
        check: SettlementCheck,
    ) -> bool {
        match check {
            SettlementCheck::PayerEntries => self
                .payer_entries()
                .filter(|p| p.payer == payer)
                .all(|p| p.flag(flag)),
            SettlementCheck::LiteralAllEntries => self
                .payer_entries()
                .all(|p| p.payer == payer && p.flag(flag)),
        }
    }

    /// Has the payer claimed payment on everything they owe here
    pub fn has_payer_fully_repaid(&self, payer: UserId, check: SettlementCheck) -> bool {
        self.payer_flag_settled(payer, SettlementFlag::HasPaid, check)
    }

    /// Has the payee confirmed every payment from the payer here
    pub fn have_payments_been_confirmed(&self, payer: UserId, check: SettlementCheck) -> bool {
        self.payer_flag_settled(payer, SettlementFlag::PaymentConfirmed, check)
    }
}

impl Event {
    /// True iff every activity paid for by `creditor` reports the payer as
    /// fully repaid. Vacuously true when the creditor paid for nothing.
    pub fn has_payer_settled_debt(
        &self,
        creditor: UserId,
        payer: UserId,
        check: SettlementCheck,
    ) -> bool {
        self.activities
            .iter()
            .filter(|a| a.payee == creditor)
            .all(|a| a.has_payer_fully_repaid(payer, check))
    }

    /// True iff every activity paid for by `creditor` has confirmed all of the
    /// payer's payments. Vacuously true when the creditor paid for nothing.
    pub fn has_creditor_confirmed_payments(
        &self,
        creditor: UserId,
        payer: UserId,
        check: SettlementCheck,
    ) -> bool {
        self.activities
            .iter()
            .filter(|a| a.payee == creditor)
            .all(|a| a.have_payments_been_confirmed(payer, check))
    }
}
