//! Cart line items and the merge used when a guest cart is claimed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::VariantId;

/// One cart line: a product variant and how many of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartItem {
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl CartItem {
    #[must_use]
    pub const fn new(variant_id: VariantId, quantity: u32) -> Self {
        Self {
            variant_id,
            quantity,
        }
    }
}

/// Combine two item lists.
///
/// Quantities of the same variant are summed (saturating at `u32::MAX`), items
/// unique to either side are kept, zero-quantity lines are dropped, and the
/// result is ordered by variant ID. The operation is commutative and
/// associative, so merging several guest carts converges regardless of order.
///
/// ```rust
/// use cartgate_core::{CartItem, VariantId, merge_items};
///
/// let a = VariantId::new(1);
/// let c = VariantId::new(3);
/// let merged = merge_items(
///     &[CartItem::new(a, 1), CartItem::new(c, 3)],
///     &[CartItem::new(a, 1)],
/// );
/// assert_eq!(merged, vec![CartItem::new(a, 2), CartItem::new(c, 3)]);
/// ```
#[must_use]
pub fn merge_items(left: &[CartItem], right: &[CartItem]) -> Vec<CartItem> {
    normalize(left.iter().chain(right))
}

/// Add `quantity` of `variant_id`, creating the line if needed.
#[must_use]
pub fn add_quantity(items: &[CartItem], variant_id: VariantId, quantity: u32) -> Vec<CartItem> {
    merge_items(items, &[CartItem::new(variant_id, quantity)])
}

/// Set the quantity of `variant_id`; zero removes the line.
#[must_use]
pub fn set_quantity(items: &[CartItem], variant_id: VariantId, quantity: u32) -> Vec<CartItem> {
    let others = items.iter().filter(|item| item.variant_id != variant_id);
    normalize(others.chain(std::iter::once(&CartItem::new(variant_id, quantity))))
}

/// Total number of units across all lines.
#[must_use]
pub fn item_count(items: &[CartItem]) -> u64 {
    items.iter().map(|item| u64::from(item.quantity)).sum()
}

fn normalize<'a>(items: impl Iterator<Item = &'a CartItem>) -> Vec<CartItem> {
    let mut totals: BTreeMap<VariantId, u32> = BTreeMap::new();
    for item in items {
        let total = totals.entry(item.variant_id).or_insert(0);
        *total = total.saturating_add(item.quantity);
    }

    totals
        .into_iter()
        .filter(|(_, quantity)| *quantity > 0)
        .map(|(variant_id, quantity)| CartItem::new(variant_id, quantity))
        .collect()
}
