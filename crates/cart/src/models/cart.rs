//! Cart contents and product snapshot types.
//!
//! A cart is a mapping from product ID to a positive quantity plus an
//! optional denormalized product snapshot. The snapshot exists to avoid a
//! catalog join on every cart read; it may be stale and is never
//! authoritative for pricing.
//!
//! Invariant: an entry with quantity zero does not exist. Every mutation
//! path goes through the helpers here, which delete instead of storing zero.

use std::collections::HashMap;

use pycshop_core::{Price, ProductId};
use serde::{Deserialize, Serialize};

/// Denormalized product data cached alongside a cart quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: Option<String>,
    pub price: Option<Price>,
    pub image: Option<String>,
    pub description: Option<String>,
}

impl ProductSnapshot {
    /// Whether the snapshot carries any data beyond its ID.
    #[must_use]
    pub const fn has_data(&self) -> bool {
        self.name.is_some()
            || self.price.is_some()
            || self.image.is_some()
            || self.description.is_some()
    }
}

/// One cart line: a positive quantity and an optional product snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartEntry {
    pub quantity: u32,
    pub product: Option<ProductSnapshot>,
}

/// A user's full cart: product ID to entry, unique per product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartContents {
    entries: HashMap<ProductId, CartEntry>,
}

impl CartContents {
    /// An empty cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cart has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct products (not total units).
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.entries.len()
    }

    /// Sum of quantities across all products.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.entries.values().map(|e| u64::from(e.quantity)).sum()
    }

    /// Look up one entry.
    #[must_use]
    pub fn get(&self, product_id: &ProductId) -> Option<&CartEntry> {
        self.entries.get(product_id)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&ProductId, &CartEntry)> {
        self.entries.iter()
    }

    /// Increment the quantity for a product, creating the entry if absent.
    ///
    /// A non-empty snapshot overwrites any previously stored one; repeated
    /// calls for the same product accumulate.
    pub fn accumulate(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        snapshot: Option<ProductSnapshot>,
    ) {
        if quantity == 0 {
            return;
        }
        let entry = self.entries.entry(product_id).or_insert(CartEntry {
            quantity: 0,
            product: None,
        });
        entry.quantity = entry.quantity.saturating_add(quantity);
        if let Some(snapshot) = snapshot
            && snapshot.has_data()
        {
            entry.product = Some(snapshot);
        }
    }

    /// Overwrite the quantity for a product. Zero deletes the entry (and its
    /// snapshot); the entry is created if absent and the quantity positive.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: u32) {
        if quantity == 0 {
            self.entries.remove(&product_id);
            return;
        }
        self.entries
            .entry(product_id)
            .and_modify(|e| e.quantity = quantity)
            .or_insert(CartEntry {
                quantity,
                product: None,
            });
    }

    /// Delete a product's entry and snapshot. Returns whether it existed.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        self.entries.remove(product_id).is_some()
    }

    /// Insert a fully formed entry, used when restoring from durable rows.
    /// Entries with quantity zero are dropped, preserving the invariant.
    pub fn insert_entry(&mut self, product_id: ProductId, entry: CartEntry) {
        if entry.quantity > 0 {
            self.entries.insert(product_id, entry);
        }
    }
}

impl FromIterator<(ProductId, CartEntry)> for CartContents {
    fn from_iter<I: IntoIterator<Item = (ProductId, CartEntry)>>(iter: I) -> Self {
        let mut contents = Self::new();
        for (product_id, entry) in iter {
            contents.insert_entry(product_id, entry);
        }
        contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> ProductSnapshot {
        ProductSnapshot {
            id: ProductId::from("p1"),
            name: Some(name.to_string()),
            price: Some(Price::from_cents(10_000)),
            image: None,
            description: None,
        }
    }

    #[test]
    fn test_accumulate_creates_and_increments() {
        let mut cart = CartContents::new();
        cart.accumulate(ProductId::from("p1"), 2, Some(snapshot("Widget")));
        cart.accumulate(ProductId::from("p1"), 2, None);

        let entry = cart.get(&ProductId::from("p1")).expect("entry");
        assert_eq!(entry.quantity, 4);
        assert_eq!(
            entry.product.as_ref().and_then(|p| p.name.as_deref()),
            Some("Widget")
        );
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.total_quantity(), 4);
    }

    #[test]
    fn test_accumulate_zero_is_noop() {
        let mut cart = CartContents::new();
        cart.accumulate(ProductId::from("p1"), 0, None);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_empty_snapshot_does_not_overwrite() {
        let mut cart = CartContents::new();
        cart.accumulate(ProductId::from("p1"), 1, Some(snapshot("Widget")));
        let bare = ProductSnapshot {
            id: ProductId::from("p1"),
            name: None,
            price: None,
            image: None,
            description: None,
        };
        cart.accumulate(ProductId::from("p1"), 1, Some(bare));

        let entry = cart.get(&ProductId::from("p1")).expect("entry");
        assert!(entry.product.as_ref().is_some_and(|p| p.name.is_some()));
    }

    #[test]
    fn test_set_quantity_zero_removes() {
        let mut cart = CartContents::new();
        cart.accumulate(ProductId::from("p1"), 3, None);
        cart.set_quantity(ProductId::from("p1"), 0);
        assert!(cart.get(&ProductId::from("p1")).is_none());
        assert!(cart.is_empty());
    }

    #[test]
    fn test_set_quantity_overwrites_not_increments() {
        let mut cart = CartContents::new();
        cart.accumulate(ProductId::from("p1"), 3, None);
        cart.set_quantity(ProductId::from("p1"), 5);
        assert_eq!(cart.get(&ProductId::from("p1")).map(|e| e.quantity), Some(5));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut cart = CartContents::new();
        cart.accumulate(ProductId::from("p1"), 1, None);
        assert!(cart.remove(&ProductId::from("p1")));
        assert!(!cart.remove(&ProductId::from("p1")));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_insert_entry_drops_zero_quantity() {
        let mut cart = CartContents::new();
        cart.insert_entry(
            ProductId::from("p1"),
            CartEntry {
                quantity: 0,
                product: None,
            },
        );
        assert!(cart.is_empty());
    }

    #[test]
    fn test_serialize_as_map() {
        let mut cart = CartContents::new();
        cart.accumulate(ProductId::from("p1"), 2, None);
        let json = serde_json::to_value(&cart).expect("serialize");
        assert_eq!(json["p1"]["quantity"], 2);
        assert!(json["p1"]["product"].is_null());
    }
}
