//! Caller-facing views of events and activities
//!
//! Amounts in the store are never rounded. Everything built here is rounded to
//! the configured number of decimal places with banker's rounding, and this is
//! the only place that happens.

use crate::{
    amortization::checked_sum,
    settlement::SettlementCheck,
    store::UserDirectory,
    types::{Activity, ActivityId, Event, EventId, Gratuity, ItemId, User, UserId},
    Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Round an amount for presentation
pub fn round_amount(amount: Decimal, decimal_places: u32) -> Decimal {
    amount.round_dp(decimal_places)
}

/// Name and contact details of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    /// User id
    pub user_id: UserId,
    /// Display name
    pub display_name: String,
    /// Email
    pub email: String,
    /// Phone number, if the user shared one
    pub phone_number: Option<String>,
}

impl From<&User> for Contact {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
        }
    }
}

/// One activity as seen from the viewer's side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityLine {
    /// Activity id
    pub activity_id: ActivityId,
    /// Activity name
    pub name: String,
    /// Who paid
    pub payee: UserId,
    /// True when the viewer is the payee and `amount` is owed to them
    pub owed_money: bool,
    /// Amount owed to the viewer, or owed by the viewer
    pub amount: Decimal,
}

/// Net position between the viewer and one other participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantBalance {
    /// Participant
    pub contact: Contact,
    /// Positive when the participant owes the viewer, negative when the viewer
    /// owes the participant
    pub amount_owed_to_you: Decimal,
    /// Debtor side has claimed payment on everything it owes the creditor side
    pub has_paid: bool,
    /// Creditor side has confirmed every payment
    pub payment_confirmed: bool,
}

/// An event as seen by one of its members
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    /// Event id
    pub event_id: EventId,
    /// Event name
    pub name: String,
    /// Event date
    pub date: DateTime<Utc>,
    /// Viewer created the event
    pub created_by_viewer: bool,
    /// Activities in creation order
    pub activities: Vec<ActivityLine>,
    /// Everyone but the viewer; the creator is listed last
    pub participants: Vec<ParticipantBalance>,
    /// Users that owe something anywhere in the event
    pub active_participants: Vec<UserId>,
    /// What the viewer is owed in total
    pub total_owed: Decimal,
    /// What the viewer owes in total
    pub total_owing: Decimal,
}

impl EventSummary {
    /// Build the summary of `event` for `viewer`
    pub fn build(
        event: &Event,
        viewer: UserId,
        directory: &impl UserDirectory,
        check: SettlementCheck,
        decimal_places: u32,
    ) -> Result<Self> {
        let round = |amount: Decimal| round_amount(amount, decimal_places);

        let mut activities = Vec::with_capacity(event.activities.len());
        for activity in &event.activities {
            let owed_money = activity.payee == viewer;
            let amount = if owed_money {
                activity.total_amount_owed(viewer)?
            } else {
                activity.total_amount_owing(viewer)?
            };
            activities.push(ActivityLine {
                activity_id: activity.id,
                name: activity.name.clone(),
                payee: activity.payee,
                owed_money,
                amount: round(amount),
            });
        }

        let mut participants = Vec::with_capacity(event.participants.len() + 1);
        for other in event.counterparts(viewer) {
            let net = event.net_amount_between(viewer, other)?;
            let (creditor, debtor) = if net > Decimal::ZERO {
                (viewer, other)
            } else {
                (other, viewer)
            };
            participants.push(ParticipantBalance {
                contact: Contact::from(directory.resolve(other)?),
                amount_owed_to_you: round(net),
                has_paid: event.has_payer_settled_debt(creditor, debtor, check),
                payment_confirmed: event.has_creditor_confirmed_payments(creditor, debtor, check),
            });
        }

        // Totals add up the rounded rows so they always match what is shown
        let rows = participants.iter().map(|p| p.amount_owed_to_you);
        let total_owed = checked_sum(rows.clone().filter(|net| *net > Decimal::ZERO), "total owed")?;
        let total_owing = checked_sum(rows.filter(|net| *net < Decimal::ZERO).map(|net| -net), "total owing")?;

        Ok(Self {
            event_id: event.id,
            name: event.name.clone(),
            date: event.date,
            created_by_viewer: event.creator == viewer,
            activities,
            participants,
            active_participants: event.active_participants(),
            total_owed,
            total_owing,
        })
    }
}

/// One payer's final share of an activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayerLine {
    /// Payer
    pub contact: Contact,
    /// Sum of the payer's item shares
    pub subtotal: Decimal,
    /// Tax on the subtotal
    pub tax: Decimal,
    /// Gratuity on the subtotal
    pub gratuity: Decimal,
    /// Final amount owed to the payee
    pub amount_owing: Decimal,
    /// Payer claimed payment on every entry
    pub has_paid: bool,
    /// Payee confirmed every entry
    pub payment_confirmed: bool,
}

/// Raw share of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemShare {
    /// Payer
    pub payer: UserId,
    /// Share before tax and gratuity
    pub amount_owing: Decimal,
    /// Claimed paid
    pub has_paid: bool,
    /// Confirmed
    pub payment_confirmed: bool,
}

/// One item and how it is split
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemLine {
    /// Item id
    pub item_id: ItemId,
    /// Item name
    pub name: String,
    /// Item cost
    pub cost: Decimal,
    /// Informational split flag
    pub split_evenly: bool,
    /// Shares as submitted
    pub payers: Vec<ItemShare>,
}

/// An activity as seen by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivitySummary {
    /// Activity id
    pub activity_id: ActivityId,
    /// Activity name
    pub name: String,
    /// Viewer paid for the activity
    pub is_payee: bool,
    /// Owed to the viewer if payee, owed by the viewer otherwise
    pub amount: Decimal,
    /// Gratuity configuration
    pub gratuity: Gratuity,
    /// 5% tax enabled
    pub add_five_percent_tax: bool,
    /// Sum of item costs
    pub subtotal: Decimal,
    /// Who paid, with contact details
    pub payee: Contact,
    /// Final amount per payer
    pub payers: Vec<PayerLine>,
    /// Items in creation order
    pub items: Vec<ItemLine>,
}

impl ActivitySummary {
    /// Build the summary of `activity` for `viewer`
    pub fn build(
        activity: &Activity,
        viewer: UserId,
        directory: &impl UserDirectory,
        decimal_places: u32,
    ) -> Result<Self> {
        let round = |amount: Decimal| round_amount(amount, decimal_places);
        let is_payee = activity.payee == viewer;
        let amount = if is_payee {
            activity.total_amount_owed(viewer)?
        } else {
            activity.total_amount_owing(viewer)?
        };

        let mut payers = Vec::new();
        for share in activity.payers()? {
            let entries = || activity.payer_entries().filter(|p| p.payer == share.payer);
            payers.push(PayerLine {
                contact: Contact::from(directory.resolve(share.payer)?),
                subtotal: round(share.subtotal),
                tax: round(share.surcharge.tax),
                gratuity: round(share.surcharge.gratuity),
                amount_owing: round(share.amount_owing),
                has_paid: entries().all(|p| p.has_paid),
                payment_confirmed: entries().all(|p| p.payment_confirmed),
            });
        }

        let items = activity
            .items
            .iter()
            .map(|item| ItemLine {
                item_id: item.id,
                name: item.name.clone(),
                cost: round(item.cost),
                split_evenly: item.split_evenly,
                payers: item
                    .payers
                    .iter()
                    .map(|p| ItemShare {
                        payer: p.payer,
                        amount_owing: round(p.amount_owing),
                        has_paid: p.has_paid,
                        payment_confirmed: p.payment_confirmed,
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            activity_id: activity.id,
            name: activity.name.clone(),
            is_payee,
            amount: round(amount),
            gratuity: activity.gratuity,
            add_five_percent_tax: activity.add_five_percent_tax,
            subtotal: round(activity.subtotal()?),
            payee: Contact::from(directory.resolve(activity.payee)?),
            payers,
            items,
        })
    }
}
