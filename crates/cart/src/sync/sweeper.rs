//! Pending-sync markers and the periodic reconciliation sweep.
//!
//! Every cache mutation marks its user in the [`PendingSet`]. On a fixed
//! interval the sweep drains the set and persists each marked user's
//! current cache contents - an empty cart becomes a durable clear, which
//! is how `clear` is guaranteed to converge even if its bus event was
//! dropped. Users whose sync fails are re-marked and retried next sweep.
//!
//! The set is deduplicated and best-effort: losing it costs at most one
//! early sync, never data, because the cache entry itself still exists and
//! any later mutation re-marks the user.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pycshop_core::UserId;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use crate::cache::CartCache;
use crate::db::DurableCartStore;

/// Deduplicated set of users with unreconciled cache changes.
#[derive(Clone, Default)]
pub struct PendingSet {
    inner: Arc<Mutex<HashSet<UserId>>>,
}

impl PendingSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user as having unreconciled changes.
    pub fn mark(&self, user_id: UserId) {
        self.lock().insert(user_id);
    }

    /// Remove a user's marker after a successful reconciliation.
    pub fn unmark(&self, user_id: UserId) {
        self.lock().remove(&user_id);
    }

    /// Whether a user is currently marked.
    #[must_use]
    pub fn contains(&self, user_id: UserId) -> bool {
        self.lock().contains(&user_id)
    }

    /// Take every marked user, leaving the set empty.
    #[must_use]
    pub fn drain(&self) -> Vec<UserId> {
        self.lock().drain().collect()
    }

    /// Number of marked users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no users are marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<UserId>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodic reconciliation sweep over the pending-sync set.
pub struct Sweeper {
    cache: CartCache,
    store: Arc<dyn DurableCartStore>,
    pending: PendingSet,
    interval: Duration,
}

impl Sweeper {
    /// Create a sweeper over the given cache and store.
    #[must_use]
    pub fn new(
        cache: CartCache,
        store: Arc<dyn DurableCartStore>,
        pending: PendingSet,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            pending,
            interval,
        }
    }

    /// Run the sweep loop until the shutdown signal flips, then flush once.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first real sweep
        // happens one full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Final flush so markers accumulated since the last tick are not
        // lost across a restart.
        let flushed = self.sweep().await;
        info!(flushed, "sweeper stopped");
    }

    /// Reconcile every marked user once. Returns the number synced.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> usize {
        let users = self.pending.drain();
        if users.is_empty() {
            return 0;
        }

        let mut synced = 0;
        for user_id in users {
            let cart = self.cache.peek(user_id).await;
            match self.store.persist_cart(user_id, &cart).await {
                Ok(()) => synced += 1,
                Err(error) => {
                    error!(%user_id, %error, "sweep reconciliation failed, re-marking");
                    self.pending.mark(user_id);
                }
            }
        }

        info!(synced, remaining = self.pending.len(), "reconciliation sweep complete");
        synced
    }
}

#[cfg(test)]
mod tests {
    use pycshop_core::ProductId;

    use super::*;
    use crate::db::MemoryCartStore;

    fn sweeper_parts() -> (CartCache, Arc<MemoryCartStore>, PendingSet) {
        let store = Arc::new(MemoryCartStore::new());
        let pending = PendingSet::new();
        let cache = CartCache::new(
            Duration::from_secs(604_800),
            store.clone(),
            pending.clone(),
        );
        (cache, store, pending)
    }

    #[test]
    fn test_pending_set_deduplicates() {
        let pending = PendingSet::new();
        pending.mark(UserId::new(1));
        pending.mark(UserId::new(1));
        pending.mark(UserId::new(2));
        assert_eq!(pending.len(), 2);

        pending.unmark(UserId::new(2));
        assert!(!pending.contains(UserId::new(2)));
        assert!(pending.contains(UserId::new(1)));
    }

    #[tokio::test]
    async fn test_sweep_syncs_marked_users_and_clears_markers() {
        let (cache, store, pending) = sweeper_parts();
        let user = UserId::new(1);

        cache.add_item(user, ProductId::from("p1"), 2, None).await;
        assert!(pending.contains(user));

        let sweeper = Sweeper::new(cache, store.clone(), pending.clone(), Duration::from_secs(300));
        assert_eq!(sweeper.sweep().await, 1);

        assert!(pending.is_empty());
        let durable = store.stored_cart(user).await;
        assert_eq!(durable.get(&ProductId::from("p1")).map(|e| e.quantity), Some(2));
    }

    #[tokio::test]
    async fn test_sweep_syncs_empty_cart_after_clear() {
        let (cache, store, pending) = sweeper_parts();
        let user = UserId::new(1);

        store.seed_cart(user, {
            let mut cart = crate::models::CartContents::new();
            cart.accumulate(ProductId::from("p1"), 2, None);
            cart
        })
        .await;

        cache.clear(user).await;
        let sweeper = Sweeper::new(cache, store.clone(), pending, Duration::from_secs(300));
        sweeper.sweep().await;

        assert!(store.stored_cart(user).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_sync_re_marks_user() {
        let (cache, store, pending) = sweeper_parts();
        let user = UserId::new(1);

        cache.add_item(user, ProductId::from("p1"), 1, None).await;
        store.set_fail_writes(true);

        let sweeper = Sweeper::new(cache, store.clone(), pending.clone(), Duration::from_secs(300));
        assert_eq!(sweeper.sweep().await, 0);
        assert!(pending.contains(user));

        // Next sweep succeeds once the store recovers
        store.set_fail_writes(false);
        assert_eq!(sweeper.sweep().await, 1);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_failed_durable_clear_re_marks_user() {
        let (cache, store, pending) = sweeper_parts();
        let user = UserId::new(1);

        cache.clear(user).await;
        store.set_fail_writes(true);

        let sweeper = Sweeper::new(cache, store.clone(), pending.clone(), Duration::from_secs(300));
        assert_eq!(sweeper.sweep().await, 0);
        assert!(pending.contains(user));

        store.set_fail_writes(false);
        assert_eq!(sweeper.sweep().await, 1);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_with_no_markers_is_noop() {
        let (cache, store, pending) = sweeper_parts();
        let sweeper = Sweeper::new(cache, store, pending, Duration::from_secs(300));
        assert_eq!(sweeper.sweep().await, 0);
    }
}
