//! Item reconciliation for activity edits
//!
//! An edit submits a complete new item list. Rather than replacing every
//! stored item, the list is compared structurally against the existing items:
//! matches are left alone, unmatched proposals are added and unmatched existing
//! items are removed.
//!
//! Two items match when name, cost, split flag and the full payer-to-amount map
//! are identical. The payer map is a [`BTreeMap`], so the derived `Hash` walks
//! it in key order and logically equal maps hash equally regardless of the
//! order shares were inserted in.

use crate::amortization::checked_sum;
use crate::error::Result;
use crate::types::{ActivityItem, ItemId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// An item as submitted by a caller, and the comparable form of a stored item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposedItem {
    /// Item name
    pub name: String,
    /// Item cost before tax and gratuity
    pub cost: Decimal,
    /// Informational split flag
    pub split_evenly: bool,
    /// Payer id to pre-allocated share
    pub payers: BTreeMap<UserId, Decimal>,
}

impl ProposedItem {
    /// Item with no payers yet
    pub fn new(name: impl Into<String>, cost: Decimal, split_evenly: bool) -> Self {
        Self {
            name: name.into(),
            cost,
            split_evenly,
            payers: BTreeMap::new(),
        }
    }

    /// Add a payer share (builder style)
    pub fn with_payer(mut self, payer: UserId, amount: Decimal) -> Self {
        self.payers.insert(payer, amount);
        self
    }

    /// Sum of all shares
    pub fn total_shares(&self) -> Result<Decimal> {
        checked_sum(self.payers.values().copied(), "item shares")
    }
}

impl From<&ActivityItem> for ProposedItem {
    fn from(item: &ActivityItem) -> Self {
        let mut payers: BTreeMap<UserId, Decimal> = BTreeMap::new();
        for entry in &item.payers {
            *payers.entry(entry.payer).or_insert(Decimal::ZERO) += entry.amount_owing;
        }
        Self {
            name: item.name.clone(),
            cost: item.cost,
            split_evenly: item.split_evenly,
            payers,
        }
    }
}

/// Outcome of reconciling a proposed item list against stored items
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDiff {
    /// Proposals with no stored counterpart
    pub to_add: Vec<ProposedItem>,
    /// Stored items with no proposed counterpart
    pub to_remove: Vec<ItemId>,
    /// Stored items matched by a proposal; storage leaves them untouched
    pub unchanged: Vec<ItemId>,
}

impl ItemDiff {
    /// Nothing to add or remove
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute which items to add and which to remove.
///
/// Matching is one-to-one: two identical proposals need two identical stored
/// items to both count as unchanged.
pub fn diff_items(existing: &[ActivityItem], proposed: &[ProposedItem]) -> ItemDiff {
    let mut available: HashMap<ProposedItem, Vec<ItemId>> = HashMap::with_capacity(existing.len());
    for item in existing.iter().rev() {
        available.entry(ProposedItem::from(item)).or_default().push(item.id);
    }

    let mut diff = ItemDiff::default();
    for candidate in proposed {
        match available.get_mut(candidate).and_then(|ids| ids.pop()) {
            Some(id) => diff.unchanged.push(id),
            None => diff.to_add.push(candidate.clone()),
        }
    }

    diff.to_remove = existing
        .iter()
        .map(|item| item.id)
        .filter(|id| !diff.unchanged.contains(id))
        .collect();

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityId, ItemPayer};
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn stored(id: i64, name: &str, cost: i64, shares: &[(i64, i64)]) -> ActivityItem {
        ActivityItem {
            id: ItemId(id),
            activity_id: ActivityId(1),
            name: name.to_string(),
            cost: Decimal::from(cost),
            split_evenly: false,
            payers: shares
                .iter()
                .map(|(user, amount)| ItemPayer::new(UserId(*user), Decimal::from(*amount)))
                .collect(),
        }
    }

    fn hash_of(item: &ProposedItem) -> u64 {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_unchanged_list_produces_empty_diff() {
        let existing = vec![stored(1, "Pizza", 30, &[(2, 15), (3, 15)]), stored(2, "Wine", 20, &[(2, 20)])];
        let proposed: Vec<ProposedItem> = existing.iter().map(ProposedItem::from).collect();

        let diff = diff_items(&existing, &proposed);
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, vec![ItemId(1), ItemId(2)]);
    }

    #[test]
    fn test_payer_insertion_order_does_not_matter() {
        let a = ProposedItem::new("Pizza", Decimal::from(30), true)
            .with_payer(UserId(2), Decimal::from(15))
            .with_payer(UserId(3), Decimal::from(15));
        let b = ProposedItem::new("Pizza", Decimal::from(30), true)
            .with_payer(UserId(3), Decimal::from(15))
            .with_payer(UserId(2), Decimal::from(15));

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_decimal_scale_does_not_matter() {
        let a = ProposedItem::new("Pizza", Decimal::new(3000, 2), true);
        let b = ProposedItem::new("Pizza", Decimal::from(30), true);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_changed_share_replaces_item() {
        let existing = vec![stored(1, "Pizza", 30, &[(2, 15), (3, 15)]), stored(2, "Wine", 20, &[(2, 20)])];
        let proposed = vec![
            ProposedItem::from(&existing[0]),
            ProposedItem::new("Wine", Decimal::from(20), false)
                .with_payer(UserId(2), Decimal::from(10))
                .with_payer(UserId(3), Decimal::from(10)),
        ];

        let diff = diff_items(&existing, &proposed);
        assert_eq!(diff.to_remove, vec![ItemId(2)]);
        assert_eq!(diff.to_add, vec![proposed[1].clone()]);
        assert_eq!(diff.unchanged, vec![ItemId(1)]);
    }

    #[test]
    fn test_payer_superset_is_not_a_match() {
        let existing = vec![stored(1, "Pizza", 30, &[(2, 15)])];
        let proposed = vec![ProposedItem::from(&existing[0]).with_payer(UserId(3), Decimal::from(15))];

        let diff = diff_items(&existing, &proposed);
        assert_eq!(diff.to_add.len(), 1);
        assert_eq!(diff.to_remove, vec![ItemId(1)]);
    }

    #[test]
    fn test_name_and_split_flag_participate() {
        let existing = vec![stored(1, "Pizza", 30, &[(2, 30)])];
        let mut renamed = ProposedItem::from(&existing[0]);
        renamed.name = "Pasta".to_string();
        let mut resplit = ProposedItem::from(&existing[0]);
        resplit.split_evenly = true;

        assert_eq!(diff_items(&existing, &[renamed]).to_remove, vec![ItemId(1)]);
        assert_eq!(diff_items(&existing, &[resplit]).to_remove, vec![ItemId(1)]);
    }

    #[test]
    fn test_duplicates_match_one_to_one() {
        let existing = vec![stored(1, "Beer", 5, &[(2, 5)])];
        let beer = ProposedItem::from(&existing[0]);

        let diff = diff_items(&existing, &[beer.clone(), beer.clone()]);
        assert_eq!(diff.unchanged, vec![ItemId(1)]);
        assert_eq!(diff.to_add, vec![beer]);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_empty_proposal_removes_everything() {
        let existing = vec![stored(1, "Beer", 5, &[(2, 5)]), stored(2, "Fries", 4, &[(3, 4)])];
        let diff = diff_items(&existing, &[]);
        assert_eq!(diff.to_remove, vec![ItemId(1), ItemId(2)]);
        assert!(diff.to_add.is_empty());
    }
}
