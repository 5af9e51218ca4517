//! Reconciliation consumer: the bridge from cache state to durable state.
//!
//! One consumer loop runs per bus partition. For every event it re-reads
//! the live cache for the event's user and overwrite-merges that into the
//! durable store; checkout events clear the durable cart, matching the
//! already-cleared cache. Because state is re-derived rather than replayed
//! from the payload, redelivered or reordered duplicates are harmless.
//!
//! A failed reconciliation is logged, the user is re-marked pending so the
//! sweep retries, and the loop moves on - one bad message never halts the
//! partition.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument};

use super::events::{CartEvent, CartEventKind};
use super::sweeper::PendingSet;
use crate::cache::CartCache;
use crate::db::{DurableCartStore, RepositoryError};

/// Consumes sync events and reconciles the durable store to the cache.
#[derive(Clone)]
pub struct ReconcileConsumer {
    cache: CartCache,
    store: Arc<dyn DurableCartStore>,
    pending: PendingSet,
}

impl ReconcileConsumer {
    /// Create a consumer sharing the service's cache, store, and markers.
    #[must_use]
    pub fn new(cache: CartCache, store: Arc<dyn DurableCartStore>, pending: PendingSet) -> Self {
        Self {
            cache,
            store,
            pending,
        }
    }

    /// Drain one partition until shutdown, then finish whatever is queued.
    pub async fn run(
        self,
        partition: usize,
        mut events: mpsc::Receiver<CartEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(partition, "reconciliation consumer started");
        loop {
            tokio::select! {
                maybe = events.recv() => {
                    match maybe {
                        Some(event) => self.handle(event).await,
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Finish events already accepted onto the partition before exiting,
        // so shutdown does not strand acknowledged work.
        while let Ok(event) = events.try_recv() {
            self.handle(event).await;
        }
        info!(partition, "reconciliation consumer stopped");
    }

    /// Process one event, isolating failures to this message.
    pub async fn handle(&self, event: CartEvent) {
        let user_id = event.user_id;
        if let Err(error) = self.reconcile(&event).await {
            error!(
                %user_id,
                action = event.action(),
                event_id = %event.event_id,
                %error,
                "reconciliation failed, will retry on next sweep"
            );
            self.pending.mark(user_id);
        }
    }

    #[instrument(skip(self, event), fields(user_id = %event.user_id, action = event.action()))]
    async fn reconcile(&self, event: &CartEvent) -> Result<(), RepositoryError> {
        match &event.kind {
            CartEventKind::Checkout {
                cart_items,
                order_data,
            } => {
                // Order creation belongs to the order service; here we only
                // record the checkout and clear the durable cart to match
                // the already-cleared cache.
                info!(
                    items = cart_items.item_count(),
                    units = cart_items.total_quantity(),
                    has_order_data = !order_data.is_null(),
                    "checkout event received"
                );
                self.store.clear_cart(event.user_id).await?;
            }
            _ => {
                let cart = self.cache.peek(event.user_id).await;
                self.store.persist_cart(event.user_id, &cart).await?;
            }
        }
        self.pending.unmark(event.user_id);
        Ok(())
    }
}
