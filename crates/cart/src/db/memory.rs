//! In-memory [`DurableCartStore`] for tests and local development.
//!
//! Mirrors the `PostgreSQL` store's observable behavior: `sync_cart` is an
//! overwrite-merge, and `load_cart` re-joins product fields from a catalog
//! map rather than returning whatever snapshot was stored. Reads and writes
//! can be made to fail on demand to exercise the degradation paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pycshop_core::{ProductId, UserId};
use tokio::sync::RwLock;

use super::{DurableCartStore, RepositoryError};
use crate::models::{CartContents, CartEntry, ProductSnapshot};

/// In-memory cart store with failure injection.
#[derive(Default)]
pub struct MemoryCartStore {
    carts: RwLock<HashMap<UserId, CartContents>>,
    catalog: RwLock<HashMap<ProductId, ProductSnapshot>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryCartStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `load_cart` calls fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `sync_cart`/`clear_cart` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Register a catalog product so loads can join fresh snapshot fields.
    pub async fn insert_product(&self, snapshot: ProductSnapshot) {
        self.catalog
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot);
    }

    /// Seed a durable cart directly, bypassing `sync_cart`.
    pub async fn seed_cart(&self, user_id: UserId, cart: CartContents) {
        self.carts.write().await.insert(user_id, cart);
    }

    /// Raw durable contents for assertions.
    pub async fn stored_cart(&self, user_id: UserId) -> CartContents {
        self.carts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DurableCartStore for MemoryCartStore {
    async fn load_cart(&self, user_id: UserId) -> Result<CartContents, RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("reads disabled".to_string()));
        }

        let carts = self.carts.read().await;
        let Some(stored) = carts.get(&user_id) else {
            return Ok(CartContents::new());
        };

        // Re-join current catalog fields, like the SQL load does.
        let catalog = self.catalog.read().await;
        let contents = stored
            .iter()
            .map(|(product_id, entry)| {
                (
                    product_id.clone(),
                    CartEntry {
                        quantity: entry.quantity,
                        product: catalog.get(product_id).cloned(),
                    },
                )
            })
            .collect();
        Ok(contents)
    }

    async fn sync_cart(
        &self,
        user_id: UserId,
        cart: &CartContents,
    ) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("writes disabled".to_string()));
        }
        self.carts.write().await.insert(user_id, cart.clone());
        Ok(())
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("writes disabled".to_string()));
        }
        self.carts.write().await.remove(&user_id);
        Ok(())
    }

    async fn active_cart_user_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        let carts = self.carts.read().await;
        Ok(carts
            .iter()
            .filter(|(_, cart)| !cart.is_empty())
            .map(|(user_id, _)| *user_id)
            .collect())
    }
}
