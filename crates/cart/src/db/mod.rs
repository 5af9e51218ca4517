//! Database operations for the cart `PostgreSQL` store.
//!
//! # Tables
//!
//! - `cart.cart` - one row per user, created lazily on first persist
//! - `cart.cart_line_item` - line items, unique on `(cart_id, product_id)`
//! - `catalog.product` - owned by the product service; joined for fresh
//!   snapshot fields on restore
//!
//! # Migrations
//!
//! Migrations are stored in `crates/cart/migrations/` and run via
//! `sqlx migrate run` against the cart database.

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub mod carts;
pub mod memory;

pub use carts::{DurableCartStore, PgCartStore};
pub use memory::MemoryCartStore;

/// Errors from the durable cart store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row violates an invariant (e.g. negative quantity).
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// The store rejected the operation (used by test fakes to simulate
    /// outages).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
