//! Partitioned in-process sync event bus.
//!
//! Events are routed to a partition by hashing the user ID, so all events
//! for one user share a partition and arrive in publish order. Each
//! partition is a bounded mpsc channel drained by its own consumer task.
//!
//! Publishing is fire-and-forget: a full or closed partition never fails
//! the cart operation that produced the event. Dropped events are counted
//! and written to a dead-letter log line in full, so operators can observe
//! publish failure rates and replay if needed. The periodic sweep makes a
//! dropped event a staleness problem, not a data-loss problem.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pycshop_core::UserId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::error;

use super::events::CartEvent;

/// Factory for the producer/receiver halves of the bus.
pub struct SyncBus;

impl SyncBus {
    /// Create a bus with `partitions` bounded channels of `capacity` each.
    ///
    /// Returns the shared producer and one receiver per partition; spawn
    /// one [`super::ReconcileConsumer`] loop per receiver.
    #[must_use]
    pub fn new(partitions: usize, capacity: usize) -> (SyncProducer, Vec<mpsc::Receiver<CartEvent>>) {
        let partitions = partitions.max(1);
        let capacity = capacity.max(1);

        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            receivers.push(rx);
        }

        let producer = SyncProducer {
            senders: senders.into(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (producer, receivers)
    }
}

/// Cheaply cloneable publishing handle.
#[derive(Clone)]
pub struct SyncProducer {
    senders: Arc<[mpsc::Sender<CartEvent>]>,
    dropped: Arc<AtomicU64>,
}

impl SyncProducer {
    /// Publish an event to its user's partition, without blocking.
    ///
    /// Failures are swallowed by design: the event is dead-lettered to the
    /// log and counted, and the caller proceeds as if publish succeeded.
    pub fn publish(&self, event: CartEvent) {
        let partition = self.partition_for(event.user_id);
        match self.senders[partition].try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event) | TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let payload = serde_json::to_string(&event)
                    .unwrap_or_else(|_| format!("{event:?}"));
                error!(
                    target: "pycshop_cart::dead_letter",
                    partition,
                    action = event.action(),
                    user_id = %event.user_id,
                    payload,
                    "sync event dropped"
                );
            }
        }
    }

    /// Number of events dropped since startup.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Partition index for a user; stable for the lifetime of the bus.
    #[must_use]
    pub fn partition_for(&self, user_id: UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        usize::try_from(hasher.finish() % self.senders.len() as u64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::events::CartEventKind;
    use super::*;

    #[test]
    fn test_same_user_same_partition() {
        let (producer, _receivers) = SyncBus::new(4, 8);
        let user = UserId::new(42);
        let first = producer.partition_for(user);
        for _ in 0..10 {
            assert_eq!(producer.partition_for(user), first);
        }
    }

    #[tokio::test]
    async fn test_publish_delivers_to_partition() {
        let (producer, mut receivers) = SyncBus::new(1, 8);
        let event = CartEvent::new(UserId::new(1), CartEventKind::Sync);
        let event_id = event.event_id;

        producer.publish(event);

        let received = receivers[0].recv().await.expect("event");
        assert_eq!(received.event_id, event_id);
        assert_eq!(producer.dropped_events(), 0);
    }

    #[tokio::test]
    async fn test_full_partition_drops_and_counts() {
        let (producer, _receivers) = SyncBus::new(1, 1);

        producer.publish(CartEvent::new(UserId::new(1), CartEventKind::Sync));
        // Nothing drains the queue, so the second publish overflows
        producer.publish(CartEvent::new(UserId::new(1), CartEventKind::Sync));

        assert_eq!(producer.dropped_events(), 1);
    }

    #[tokio::test]
    async fn test_closed_partition_drops_without_panicking() {
        let (producer, receivers) = SyncBus::new(1, 8);
        drop(receivers);

        producer.publish(CartEvent::new(UserId::new(1), CartEventKind::Sync));
        assert_eq!(producer.dropped_events(), 1);
    }
}
