//! Validated inputs for activity and event mutations
//!
//! Caller-supplied allocations are checked here before anything reaches the
//! persistence gateway, so a malformed ledger can never be written.

use crate::{
    differ::ProposedItem,
    store::UserDirectory,
    types::{Gratuity, UserId},
    Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest accepted item cost, share or flat gratuity
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Largest accepted percent gratuity
pub const MAX_GRATUITY_PERCENT: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// A new or edited activity as submitted by its payee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDraft {
    /// Activity name
    pub name: String,
    /// Gratuity configuration
    #[serde(default)]
    pub gratuity: Gratuity,
    /// Add 5% tax
    #[serde(default)]
    pub add_five_percent_tax: bool,
    /// Complete item list
    pub items: Vec<ProposedItem>,
}

impl ActivityDraft {
    /// Draft with no items, gratuity or tax
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gratuity: Gratuity::NONE,
            add_five_percent_tax: false,
            items: Vec::new(),
        }
    }

    /// Set gratuity (builder style)
    pub fn with_gratuity(mut self, gratuity: Gratuity) -> Self {
        self.gratuity = gratuity;
        self
    }

    /// Enable 5% tax (builder style)
    pub fn with_tax(mut self) -> Self {
        self.add_five_percent_tax = true;
        self
    }

    /// Add an item (builder style)
    pub fn with_item(mut self, item: ProposedItem) -> Self {
        self.items.push(item);
        self
    }

    /// Check the draft for an activity paid for by `payee`.
    ///
    /// On success the name is trimmed. Every payer must resolve in `directory`.
    pub fn validate(mut self, payee: UserId, directory: &impl UserDirectory) -> Result<Self> {
        self.name = non_blank(&self.name, "Activity name")?;

        if self.gratuity.amount() < Decimal::ZERO {
            return Err(Error::InvalidInput(
                "Gratuity amount cannot be negative".to_string(),
            ));
        }
        match self.gratuity {
            Gratuity::Percent(percent) if percent > MAX_GRATUITY_PERCENT => {
                return Err(Error::InvalidInput(format!(
                    "Gratuity percent {} exceeds {}",
                    percent, MAX_GRATUITY_PERCENT
                )));
            }
            Gratuity::Flat(amount) if amount > MAX_AMOUNT => {
                return Err(Error::InvalidInput(format!(
                    "Gratuity amount {} exceeds {}",
                    amount, MAX_AMOUNT
                )));
            }
            _ => {}
        }

        if self.items.is_empty() {
            return Err(Error::InvalidInput(
                "An activity needs at least one item".to_string(),
            ));
        }

        for item in &mut self.items {
            item.name = non_blank(&item.name, "Item name")?;
            validate_item(item, payee)?;
            for payer in item.payers.keys() {
                directory.resolve(*payer)?;
            }
        }

        Ok(self)
    }
}

fn validate_item(item: &ProposedItem, payee: UserId) -> Result<()> {
    if item.cost <= Decimal::ZERO {
        return Err(Error::InvalidInput(format!(
            "Item '{}' must have a positive cost",
            item.name
        )));
    }
    if item.cost > MAX_AMOUNT {
        return Err(Error::InvalidInput(format!(
            "Item '{}' cost {} exceeds {}",
            item.name, item.cost, MAX_AMOUNT
        )));
    }

    if !item.payers.keys().any(|payer| *payer != payee) {
        return Err(Error::InvalidInput(format!(
            "Item '{}' must have a payer other than the payee",
            item.name
        )));
    }

    if let Some((payer, _)) = item.payers.iter().find(|(_, share)| **share < Decimal::ZERO) {
        return Err(Error::InvalidInput(format!(
            "Item '{}' has a negative share for user {}",
            item.name, payer
        )));
    }

    if let Some((payer, _)) = item.payers.iter().find(|(_, share)| **share > MAX_AMOUNT) {
        return Err(Error::InvalidInput(format!(
            "Item '{}' share for user {} exceeds {}",
            item.name, payer, MAX_AMOUNT
        )));
    }

    let shares = item.total_shares().map_err(|_| {
        Error::InvalidInput(format!("Item '{}' shares are out of range", item.name))
    })?;
    if shares > item.cost {
        return Err(Error::InvalidInput(format!(
            "Item '{}' shares total {} which exceeds its cost {}",
            item.name, shares, item.cost
        )));
    }

    Ok(())
}

/// A new or edited event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Event name
    pub name: String,
    /// Date the event took place
    pub date: DateTime<Utc>,
    /// Participant ids, the creator excluded
    #[serde(default)]
    pub participants: Vec<UserId>,
}

impl EventDraft {
    /// New draft
    pub fn new(name: impl Into<String>, date: DateTime<Utc>, participants: Vec<UserId>) -> Self {
        Self {
            name: name.into(),
            date,
            participants,
        }
    }

    /// Trim the name, drop duplicate participants and `creator`, and resolve
    /// every participant id
    pub fn validate(mut self, creator: UserId, directory: &impl UserDirectory) -> Result<Self> {
        self.name = non_blank(&self.name, "Event name")?;

        let mut participants: Vec<UserId> = Vec::with_capacity(self.participants.len());
        for id in self.participants {
            directory.resolve(id)?;
            if id != creator && !participants.contains(&id) {
                participants.push(id);
            }
        }
        self.participants = participants;

        Ok(self)
    }
}

/// Display name, email and phone number of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Display name
    pub display_name: String,
    /// Email
    pub email: String,
    /// Optional phone number
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl UserProfile {
    /// Profile without a phone number
    pub fn new(display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            email: email.into(),
            phone_number: None,
        }
    }

    /// Set the phone number (builder style)
    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    /// Trim every field, require a name and a plausible email, and turn a
    /// blank phone number into none
    pub fn validate(mut self) -> Result<Self> {
        self.display_name = non_blank(&self.display_name, "Display name")?;
        self.email = non_blank(&self.email, "Email")?;
        if !self.email.contains('@') {
            return Err(Error::InvalidInput(format!("Invalid email: {}", self.email)));
        }
        self.phone_number = self
            .phone_number
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        Ok(self)
    }
}

fn non_blank(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{} cannot be empty", what)));
    }
    Ok(trimmed.to_string())
}
