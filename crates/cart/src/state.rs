//! Application state shared across handlers.
//!
//! All services are constructed once at process start and injected here;
//! nothing in the crate is a module-level singleton.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::CartCache;
use crate::config::CartConfig;
use crate::db::DurableCartStore;
use crate::sync::{PendingSet, SyncProducer};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like the cart cache, durable store, and sync producer.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: CartConfig,
    pool: PgPool,
    cache: CartCache,
    store: Arc<dyn DurableCartStore>,
    producer: SyncProducer,
    pending: PendingSet,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        config: CartConfig,
        pool: PgPool,
        cache: CartCache,
        store: Arc<dyn DurableCartStore>,
        producer: SyncProducer,
        pending: PendingSet,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                cache,
                store,
                producer,
                pending,
            }),
        }
    }

    /// Get a reference to the service configuration.
    #[must_use]
    pub fn config(&self) -> &CartConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the fast cart cache.
    #[must_use]
    pub fn cache(&self) -> &CartCache {
        &self.inner.cache
    }

    /// Get a reference to the durable cart store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableCartStore> {
        &self.inner.store
    }

    /// Get a reference to the sync event producer.
    #[must_use]
    pub fn producer(&self) -> &SyncProducer {
        &self.inner.producer
    }

    /// Get a reference to the pending-sync marker set.
    #[must_use]
    pub fn pending(&self) -> &PendingSet {
        &self.inner.pending
    }
}
