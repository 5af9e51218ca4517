//! Cart sync event payloads.
//!
//! Events are serialized to JSON for dead-letter logging, so a dropped
//! event can be reconstructed and replayed from the log line alone.

use chrono::{DateTime, Utc};
use pycshop_core::{ProductId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::CartContents;

/// One cart mutation/sync/checkout event, keyed by user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartEvent {
    pub event_id: Uuid,
    pub user_id: UserId,
    #[serde(flatten)]
    pub kind: CartEventKind,
    pub occurred_at: DateTime<Utc>,
}

/// What happened to the cart.
///
/// The consumer treats every non-checkout kind identically (re-read the
/// cache, sync it); the distinction exists for observability and for
/// downstream subscribers such as the order service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CartEventKind {
    Add {
        product_id: ProductId,
    },
    Update {
        product_id: ProductId,
        quantity: u32,
    },
    Remove {
        product_id: ProductId,
    },
    Clear,
    /// Explicit full-resync request (logout flow, clear convergence).
    Sync,
    /// Checkout snapshot handed to downstream consumers; the cart cache is
    /// already cleared by the time this is consumed.
    Checkout {
        cart_items: CartContents,
        order_data: serde_json::Value,
    },
}

impl CartEvent {
    /// Create an event stamped with a fresh ID and the current time.
    #[must_use]
    pub fn new(user_id: UserId, kind: CartEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id,
            kind,
            occurred_at: Utc::now(),
        }
    }

    /// Short action label for logs.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self.kind {
            CartEventKind::Add { .. } => "add",
            CartEventKind::Update { .. } => "update",
            CartEventKind::Remove { .. } => "remove",
            CartEventKind::Clear => "clear",
            CartEventKind::Sync => "sync",
            CartEventKind::Checkout { .. } => "checkout",
        }
    }
}
