//! Tax and gratuity amortization
//!
//! Payer shares arrive pre-allocated. This module only turns a pre-tax base
//! into what is actually owed for one activity:
//!
//! ```text
//! tax(base)      = base * 5%                      if add_five_percent_tax
//! gratuity(base) = base * percent / 100           for Gratuity::Percent
//!                = flat / distinct payer count    for Gratuity::Flat
//! owed(base)     = base + tax(base) + gratuity(base), or 0 when base is 0
//! ```
//!
//! No rounding happens here. Arithmetic is overflow-checked and reports
//! [`Error::AmountOverflow`] instead of panicking.

use crate::error::{Error, Result};
use crate::types::{Activity, Gratuity, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fixed tax rate (5%)
pub const TAX_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

const ONE_HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

fn overflow(what: &str) -> Error {
    Error::AmountOverflow(what.to_string())
}

/// `a + b`, failing instead of panicking when the result leaves `Decimal` range
pub fn checked_add(a: Decimal, b: Decimal, what: &str) -> Result<Decimal> {
    a.checked_add(b).ok_or_else(|| overflow(what))
}

/// `a * b`, failing instead of panicking when the result leaves `Decimal` range
pub fn checked_mul(a: Decimal, b: Decimal, what: &str) -> Result<Decimal> {
    a.checked_mul(b).ok_or_else(|| overflow(what))
}

/// Overflow-checked sum
pub fn checked_sum<I>(amounts: I, what: &str) -> Result<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| checked_add(acc, amount, what))
}

/// Surcharges owed on top of a base amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Surcharge {
    /// Tax portion
    pub tax: Decimal,
    /// Gratuity portion
    pub gratuity: Decimal,
}

impl Surcharge {
    /// Tax plus gratuity
    pub fn total(&self) -> Result<Decimal> {
        checked_add(self.tax, self.gratuity, "surcharge")
    }
}

/// One payer's aggregate across an activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerShare {
    /// Payer
    pub payer: UserId,
    /// Sum of the payer's item shares
    pub subtotal: Decimal,
    /// Tax and gratuity applied to the subtotal
    pub surcharge: Surcharge,
    /// Final amount owed to the payee
    pub amount_owing: Decimal,
}

impl Activity {
    /// Distinct payers of the activity, payee excluded
    pub fn payer_count(&self) -> usize {
        self.distinct_payers().len()
    }

    /// Distinct payers in order of first appearance, payee excluded
    pub fn distinct_payers(&self) -> Vec<UserId> {
        let mut payers: Vec<UserId> = Vec::new();
        for entry in self.debtor_entries() {
            if !payers.contains(&entry.payer) {
                payers.push(entry.payer);
            }
        }
        payers
    }

    /// Tax owed on `base`
    pub fn tax_on(&self, base: Decimal) -> Result<Decimal> {
        if self.add_five_percent_tax {
            checked_mul(base, TAX_RATE, "tax")
        } else {
            Ok(Decimal::ZERO)
        }
    }

    /// Gratuity owed on `base`.
    ///
    /// A flat gratuity is one even slice per distinct payer regardless of the
    /// base. With no payers there is nobody to charge, so the slice is zero.
    pub fn gratuity_on(&self, base: Decimal) -> Result<Decimal> {
        match self.gratuity {
            Gratuity::Percent(percent) => checked_mul(base, percent / ONE_HUNDRED, "gratuity"),
            Gratuity::Flat(amount) => match self.payer_count() {
                0 => Ok(Decimal::ZERO),
                count => Ok(amount / Decimal::from(count as u64)),
            },
        }
    }

    /// Tax and gratuity for `base`
    pub fn surcharge_on(&self, base: Decimal) -> Result<Surcharge> {
        Ok(Surcharge {
            tax: self.tax_on(base)?,
            gratuity: self.gratuity_on(base)?,
        })
    }

    /// `base` plus surcharges; a zero base stays zero
    pub fn amortize(&self, base: Decimal) -> Result<Decimal> {
        if base.is_zero() {
            return Ok(Decimal::ZERO);
        }
        checked_add(base, self.surcharge_on(base)?.total()?, "amortized amount")
    }

    /// How much `user` is owed by the payers. Zero unless `user` is the payee.
    pub fn total_amount_owed(&self, user: UserId) -> Result<Decimal> {
        if self.payee != user {
            return Ok(Decimal::ZERO);
        }
        let base = checked_sum(self.debtor_entries().map(|p| p.amount_owing), "amount owed")?;
        self.amortize(base)
    }

    /// How much `user` owes the payee. Zero when `user` is the payee.
    pub fn total_amount_owing(&self, user: UserId) -> Result<Decimal> {
        if self.payee == user {
            return Ok(Decimal::ZERO);
        }
        let base = checked_sum(
            self.payer_entries()
                .filter(|p| p.payer == user)
                .map(|p| p.amount_owing),
            "amount owing",
        )?;
        self.amortize(base)
    }

    /// Every payer's aggregated share with tax and gratuity applied per payer
    pub fn payers(&self) -> Result<Vec<PayerShare>> {
        let mut shares: Vec<PayerShare> = Vec::new();
        for entry in self.debtor_entries() {
            match shares.iter_mut().find(|s| s.payer == entry.payer) {
                Some(share) => {
                    share.subtotal = checked_add(share.subtotal, entry.amount_owing, "payer subtotal")?
                }
                None => shares.push(PayerShare {
                    payer: entry.payer,
                    subtotal: entry.amount_owing,
                    surcharge: Surcharge::default(),
                    amount_owing: Decimal::ZERO,
                }),
            }
        }

        for share in &mut shares {
            share.surcharge = self.surcharge_on(share.subtotal)?;
            share.amount_owing = checked_add(share.subtotal, share.surcharge.total()?, "payer share")?;
        }

        Ok(shares)
    }
}
