//! Fast cart cache: the primary read/write path for live traffic.
//!
//! Backed by `moka` with a sliding TTL (`time_to_idle`), so every read or
//! mutation pushes a cart's expiration out to the full window. All
//! read-modify-write mutations go through moka's entry API, which runs the
//! closure atomically per key - concurrent adds from multiple devices for
//! the same user never lose updates.
//!
//! Reads fall back to the durable store when the cache is cold and restore
//! what they find, making eviction and restarts transparent to clients. A
//! cleared or checked-out cart stays in the cache as an explicit empty
//! value until it ages out, so a read between "clear" and the next
//! reconciliation cannot resurrect stale durable rows.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::Op;
use pycshop_core::{ProductId, UserId};
use tracing::{instrument, warn};

use crate::db::DurableCartStore;
use crate::models::{CartContents, ProductSnapshot};
use crate::sync::PendingSet;

/// Upper bound on concurrently cached carts. Eviction past this point is
/// safe: evicted users read through to the durable store.
const MAX_CACHED_CARTS: u64 = 100_000;

/// Per-user cart cache with read-through restore.
#[derive(Clone)]
pub struct CartCache {
    carts: Cache<UserId, CartContents>,
    store: Arc<dyn DurableCartStore>,
    pending: PendingSet,
}

impl CartCache {
    /// Create a cache with the given sliding TTL over the given durable
    /// store.
    #[must_use]
    pub fn new(ttl: Duration, store: Arc<dyn DurableCartStore>, pending: PendingSet) -> Self {
        let carts = Cache::builder()
            .max_capacity(MAX_CACHED_CARTS)
            .time_to_idle(ttl)
            .build();

        Self {
            carts,
            store,
            pending,
        }
    }

    /// Increment a product's quantity, creating the entry if absent.
    ///
    /// A non-empty snapshot overwrites the stored one. Repeated calls
    /// accumulate; the caller validates that `quantity` is positive.
    #[instrument(skip(self, snapshot))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
        snapshot: Option<ProductSnapshot>,
    ) {
        self.ensure_warm(user_id).await;
        self.carts
            .entry(user_id)
            .and_compute_with(|maybe| {
                let mut cart = maybe.map_or_else(CartContents::new, moka::Entry::into_value);
                cart.accumulate(product_id, quantity, snapshot);
                std::future::ready(Op::Put(cart))
            })
            .await;
        self.pending.mark(user_id);
    }

    /// Overwrite a product's quantity; zero deletes the entry and snapshot.
    #[instrument(skip(self))]
    pub async fn update_item(&self, user_id: UserId, product_id: ProductId, quantity: u32) {
        self.ensure_warm(user_id).await;
        self.carts
            .entry(user_id)
            .and_compute_with(|maybe| {
                let mut cart = maybe.map_or_else(CartContents::new, moka::Entry::into_value);
                cart.set_quantity(product_id, quantity);
                std::future::ready(Op::Put(cart))
            })
            .await;
        self.pending.mark(user_id);
    }

    /// Delete a product's entry and snapshot unconditionally.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: UserId, product_id: ProductId) {
        self.ensure_warm(user_id).await;
        self.carts
            .entry(user_id)
            .and_compute_with(|maybe| {
                let mut cart = maybe.map_or_else(CartContents::new, moka::Entry::into_value);
                cart.remove(&product_id);
                std::future::ready(Op::Put(cart))
            })
            .await;
        self.pending.mark(user_id);
    }

    /// Empty the user's cart.
    ///
    /// Stores an explicit empty cart rather than invalidating the key, so
    /// reads before the next reconciliation see "empty", not a restore of
    /// the not-yet-cleared durable rows.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) {
        self.carts.insert(user_id, CartContents::new()).await;
        self.pending.mark(user_id);
    }

    /// Full cart mapping, falling back to the durable store on a cold cache.
    ///
    /// A non-empty durable cart found on fallback is restored into the cache
    /// (quantities, snapshots, and TTL) before being returned. A failed
    /// durable read degrades to an empty cart.
    pub async fn get_cart(&self, user_id: UserId) -> CartContents {
        self.ensure_warm(user_id).await;
        self.carts.get(&user_id).await.unwrap_or_default()
    }

    /// Number of distinct products, with the same fallback as `get_cart`.
    pub async fn item_count(&self, user_id: UserId) -> usize {
        self.get_cart(user_id).await.item_count()
    }

    /// Sum of all quantities, with the same fallback as `get_cart`.
    pub async fn total_quantity(&self, user_id: UserId) -> u64 {
        self.get_cart(user_id).await.total_quantity()
    }

    /// Raw cache read with no durable fallback and no restore.
    ///
    /// This is what reconciliation uses: it must see the live cache exactly,
    /// never a freshly restored copy of the rows it is about to overwrite.
    pub async fn peek(&self, user_id: UserId) -> CartContents {
        self.carts.get(&user_id).await.unwrap_or_default()
    }

    /// Restore the durable cart into the cache if the user has no cached
    /// cart at all.
    ///
    /// An existing entry always wins, even an empty one - a concurrent
    /// clear must not be overwritten by a stale durable load.
    async fn ensure_warm(&self, user_id: UserId) {
        if self.carts.contains_key(&user_id) {
            return;
        }

        let loaded = match self.store.load_cart(user_id).await {
            Ok(cart) => cart,
            Err(error) => {
                // Treat a failed durable read like "no cart found"
                warn!(%user_id, %error, "durable cart load failed, serving empty cart");
                return;
            }
        };
        if loaded.is_empty() {
            return;
        }

        self.carts
            .entry(user_id)
            .and_compute_with(|maybe| {
                let op = if maybe.is_some() {
                    Op::Nop
                } else {
                    Op::Put(loaded)
                };
                std::future::ready(op)
            })
            .await;
    }
}
