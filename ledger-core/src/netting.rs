//! Pairwise net debt across an event
//!
//! # Algorithm
//!
//! For a pair (A, B), every activity paid for by A or B contributes:
//!
//! 1. `owed_by_a`: A's unconfirmed shares in activities paid for by B
//! 2. `owed_by_b`: B's unconfirmed shares in activities paid for by A
//! 3. Each side is amortized with the activity's own tax and gratuity, and only
//!    when non-zero
//!
//! The result is `owed_by_b - owed_by_a`: positive means B owes A.
//!
//! # Example
//!
//! ```text
//! Activity 1 (payee A): B owes $60, 10% gratuity   -> B owes A $66
//! Activity 2 (payee B): A owes $20, no surcharge   -> A owes B $20
//!
//! net(A, B) = 66 - 20 = 46
//! net(B, A) = -46
//! ```

use crate::amortization::{checked_add, checked_sum};
use crate::error::{Error, Result};
use crate::types::{Activity, Event, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Both directions of debt between two users, after amortization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PairBalance {
    /// What the first user owes the second
    pub owed_by_first: Decimal,
    /// What the second user owes the first
    pub owed_by_second: Decimal,
}

impl PairBalance {
    /// Signed net: positive when the second user owes the first
    pub fn net(&self) -> Result<Decimal> {
        self.owed_by_second
            .checked_sub(self.owed_by_first)
            .ok_or_else(|| Error::AmountOverflow("net balance".to_string()))
    }
}

impl Activity {
    /// Unconfirmed, pre-surcharge amount `payer` still owes this activity's payee
    pub fn outstanding_base(&self, payer: UserId) -> Result<Decimal> {
        if payer == self.payee {
            return Ok(Decimal::ZERO);
        }
        checked_sum(
            self.payer_entries()
                .filter(|p| p.payer == payer && !p.payment_confirmed)
                .map(|p| p.amount_owing),
            "outstanding amount",
        )
    }
}

impl Event {
    /// Gross amounts owed in each direction between `a` and `b`
    pub fn pair_balance(&self, a: UserId, b: UserId) -> Result<PairBalance> {
        let mut balance = PairBalance::default();
        if a == b {
            return Ok(balance);
        }

        for activity in &self.activities {
            if activity.payee == a {
                let owed = activity.amortize(activity.outstanding_base(b)?)?;
                balance.owed_by_second = checked_add(balance.owed_by_second, owed, "pair balance")?;
            } else if activity.payee == b {
                let owed = activity.amortize(activity.outstanding_base(a)?)?;
                balance.owed_by_first = checked_add(balance.owed_by_first, owed, "pair balance")?;
            }
        }

        Ok(balance)
    }

    /// How much `b` owes `a` net of everything `a` owes `b`.
    ///
    /// Confirmed entries are excluded entirely. The result is antisymmetric:
    /// `net(a, b) == -net(b, a)`.
    pub fn net_amount_between(&self, a: UserId, b: UserId) -> Result<Decimal> {
        self.pair_balance(a, b)?.net()
    }

    /// Sum of positive net balances owed to `user` by every counterpart
    pub fn user_total_owed(&self, user: UserId) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for other in self.counterparts(user) {
            let net = self.net_amount_between(user, other)?;
            if net > Decimal::ZERO {
                total = checked_add(total, net, "total owed")?;
            }
        }
        Ok(total)
    }

    /// Sum of positive net balances `user` owes every counterpart
    pub fn user_total_owing(&self, user: UserId) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for other in self.counterparts(user) {
            let net = self.net_amount_between(other, user)?;
            if net > Decimal::ZERO {
                total = checked_add(total, net, "total owing")?;
            }
        }
        Ok(total)
    }

    /// Distinct users that appear as a payer anywhere in the event, in order of
    /// first appearance
    pub fn active_participants(&self) -> Vec<UserId> {
        let mut active: Vec<UserId> = Vec::new();
        for entry in self.activities.iter().flat_map(|a| a.payer_entries()) {
            if !active.contains(&entry.payer) {
                active.push(entry.payer);
            }
        }
        active
    }
}
