//! Durable cart store: the source of truth when the cache is cold.
//!
//! `sync_cart` is a full overwrite-merge inside one transaction, so after a
//! successful reconciliation the durable line items with quantity > 0 equal
//! the cache snapshot that was passed in. Concurrent reconciliations for the
//! same user are serialized by a per-user advisory lock; a lock that cannot
//! be acquired within the bounded wait aborts the transaction and surfaces a
//! retryable error to the caller.

use async_trait::async_trait;
use pycshop_core::{CartId, CurrencyCode, Price, ProductId, UserId};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::RepositoryError;
use crate::models::{CartContents, CartEntry, ProductSnapshot};

/// Advisory lock namespace for per-user cart reconciliation.
const CART_LOCK_SPACE: i32 = 0x_6361_7274; // "cart"

/// Transactional persistence of a user's cart.
///
/// Implemented by [`PgCartStore`] for production and
/// [`super::MemoryCartStore`] for tests and local development.
#[async_trait]
pub trait DurableCartStore: Send + Sync {
    /// Load a user's cart, joining current product fields for the snapshots.
    ///
    /// Returns an empty cart if no cart row exists. Product fields reflect
    /// the current catalog record, not a historical snapshot.
    async fn load_cart(&self, user_id: UserId) -> Result<CartContents, RepositoryError>;

    /// Overwrite the durable cart with the given snapshot, transactionally.
    ///
    /// Deletes every existing line item, re-inserts one per entry with
    /// quantity > 0, and touches the cart timestamp. Rolls back entirely on
    /// failure, leaving prior durable state untouched.
    async fn sync_cart(&self, user_id: UserId, cart: &CartContents)
    -> Result<(), RepositoryError>;

    /// Delete all line items for the user's cart (no-op without a cart row).
    async fn clear_cart(&self, user_id: UserId) -> Result<(), RepositoryError>;

    /// All users whose durable cart currently has at least one line item.
    ///
    /// Maintenance/audit path, not part of the primary sync flow.
    async fn active_cart_user_ids(&self) -> Result<Vec<UserId>, RepositoryError>;

    /// Make the durable cart match the given snapshot.
    ///
    /// An empty snapshot goes through [`Self::clear_cart`], which skips the
    /// cart-row upsert and line-item rewrite; anything else is a full
    /// [`Self::sync_cart`]. Reconciliation paths call this rather than
    /// choosing a write themselves.
    async fn persist_cart(
        &self,
        user_id: UserId,
        cart: &CartContents,
    ) -> Result<(), RepositoryError> {
        if cart.is_empty() {
            self.clear_cart(user_id).await
        } else {
            self.sync_cart(user_id, cart).await
        }
    }
}

/// `PostgreSQL` implementation of [`DurableCartStore`].
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    /// Create a new store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableCartStore for PgCartStore {
    #[instrument(skip(self))]
    async fn load_cart(&self, user_id: UserId) -> Result<CartContents, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT li.product_id, li.quantity,
                   p.name, p.price, p.image, p.description
            FROM cart.cart c
            JOIN cart.cart_line_item li ON li.cart_id = c.id
            LEFT JOIN catalog.product p ON p.id = li.product_id
            WHERE c.user_id = $1 AND li.quantity > 0
            ",
        )
        .bind(user_id.as_i32())
        .fetch_all(&self.pool)
        .await?;

        let mut contents = CartContents::new();
        for row in rows {
            let product_id: ProductId = ProductId::new(row.try_get::<String, _>("product_id")?);
            let quantity: i32 = row.try_get("quantity")?;
            let quantity = u32::try_from(quantity).map_err(|_| {
                RepositoryError::DataCorruption(format!(
                    "negative quantity for product {product_id}"
                ))
            })?;

            let name: Option<String> = row.try_get("name")?;
            let price: Option<Decimal> = row.try_get("price")?;
            let image: Option<String> = row.try_get("image")?;
            let description: Option<String> = row.try_get("description")?;

            // A missing catalog row leaves the snapshot empty; quantity is
            // still restorable.
            let product = name.is_some().then(|| ProductSnapshot {
                id: product_id.clone(),
                name,
                price: price.map(|amount| Price::new(amount, CurrencyCode::USD)),
                image,
                description,
            });

            contents.insert_entry(product_id, CartEntry { quantity, product });
        }

        Ok(contents)
    }

    #[instrument(skip(self, cart), fields(items = cart.item_count()))]
    async fn sync_cart(
        &self,
        user_id: UserId,
        cart: &CartContents,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Bound the wait so a stuck reconciliation aborts instead of hanging;
        // the caller retries on the next sweep.
        sqlx::query("SET LOCAL lock_timeout = '5s'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(CART_LOCK_SPACE)
            .bind(user_id.as_i32())
            .execute(&mut *tx)
            .await?;

        let cart_id: CartId = sqlx::query_scalar(
            r"
            INSERT INTO cart.cart (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET updated_at = now()
            RETURNING id
            ",
        )
        .bind(user_id.as_i32())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cart.cart_line_item WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;

        for (product_id, entry) in cart.iter() {
            if entry.quantity == 0 {
                continue;
            }
            let quantity = i32::try_from(entry.quantity).map_err(|_| {
                RepositoryError::DataCorruption(format!(
                    "quantity overflow for product {product_id}"
                ))
            })?;
            sqlx::query(
                "INSERT INTO cart.cart_line_item (cart_id, product_id, quantity) VALUES ($1, $2, $3)",
            )
            .bind(cart_id)
            .bind(product_id.as_str())
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self, user_id: UserId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            DELETE FROM cart.cart_line_item li
            USING cart.cart c
            WHERE li.cart_id = c.id AND c.user_id = $1
            ",
        )
        .bind(user_id.as_i32())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE cart.cart SET updated_at = now() WHERE user_id = $1")
            .bind(user_id.as_i32())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn active_cart_user_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<i32> = sqlx::query_scalar(
            r"
            SELECT DISTINCT c.user_id
            FROM cart.cart c
            JOIN cart.cart_line_item li ON li.cart_id = c.id
            WHERE li.quantity > 0
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(UserId::new).collect())
    }
}
