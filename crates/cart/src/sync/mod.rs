//! Cart synchronization: event bus, reconciliation consumer, and sweep.
//!
//! Mutations to the cart cache are decoupled from durable persistence by a
//! partitioned in-process bus. Events are keyed by user ID, so one user's
//! events always land on the same partition and are consumed in order.
//! Delivery is at-least-once from the consumer's perspective: it re-derives
//! state by reading the live cache instead of replaying event payloads, so
//! duplicates are harmless.
//!
//! The periodic sweep over the pending-sync marker set is the safety net:
//! even with the bus down or events dropped, every dirty cart reaches the
//! durable store within one sweep interval.

pub mod bus;
pub mod consumer;
pub mod events;
pub mod sweeper;

pub use bus::{SyncBus, SyncProducer};
pub use consumer::ReconcileConsumer;
pub use events::{CartEvent, CartEventKind};
pub use sweeper::{PendingSet, Sweeper};
