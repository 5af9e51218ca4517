//! Cart route handlers.
//!
//! Handlers validate input, drive the cart cache, and publish sync events.
//! The cache write is the operation; durable persistence happens
//! asynchronously and its failures are invisible here by design.

use axum::{
    Json,
    extract::{Path, State},
};
use pycshop_core::{CurrencyCode, Price, ProductId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::models::{CartContents, ProductSnapshot};
use crate::state::AppState;
use crate::sync::{CartEvent, CartEventKind};

// =============================================================================
// Request/Response Types
// =============================================================================

const fn default_quantity() -> i64 {
    1
}

/// Add to cart request body.
#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub product: Option<ProductData>,
}

/// Update cart request body.
#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub product_id: String,
    pub quantity: i64,
}

/// Denormalized product fields supplied by the caller at add-time.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductData {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub currency_code: Option<CurrencyCode>,
    pub image: Option<String>,
    pub description: Option<String>,
}

impl ProductData {
    fn into_snapshot(self, product_id: ProductId) -> ProductSnapshot {
        ProductSnapshot {
            id: product_id,
            name: self.name,
            price: self
                .price
                .map(|amount| Price::new(amount, self.currency_code.unwrap_or_default())),
            image: self.image,
            description: self.description,
        }
    }
}

/// Distinct-item count payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct CartCountData {
    pub total_items: usize,
}

/// Total-unit count payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct TotalQuantityData {
    pub total_quantity: u64,
}

/// Full cart payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct CartViewData {
    pub items: CartContents,
    pub total_items: usize,
}

// =============================================================================
// Validation Helpers
// =============================================================================

fn require_product_id(raw: &str) -> Result<ProductId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("product_id is required".to_string()));
    }
    Ok(ProductId::from(trimmed))
}

fn positive_quantity(raw: i64) -> Result<u32> {
    if raw <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be a positive integer".to_string(),
        ));
    }
    u32::try_from(raw).map_err(|_| AppError::BadRequest("quantity is too large".to_string()))
}

fn non_negative_quantity(raw: i64) -> Result<u32> {
    if raw < 0 {
        return Err(AppError::BadRequest(
            "quantity cannot be negative".to_string(),
        ));
    }
    u32::try_from(raw).map_err(|_| AppError::BadRequest("quantity is too large".to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// Add an item to the cart; repeated adds accumulate.
#[instrument(skip(state, request))]
pub async fn add(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<AddToCartRequest>,
) -> Result<ApiResponse<CartCountData>> {
    let product_id = require_product_id(&request.product_id)?;
    let quantity = positive_quantity(request.quantity)?;
    let snapshot = request
        .product
        .map(|data| data.into_snapshot(product_id.clone()));

    state
        .cache()
        .add_item(user_id, product_id.clone(), quantity, snapshot)
        .await;
    state
        .producer()
        .publish(CartEvent::new(user_id, CartEventKind::Add { product_id }));

    let total_items = state.cache().item_count(user_id).await;
    Ok(ApiResponse::ok(
        "Item added to cart",
        CartCountData { total_items },
    ))
}

/// Overwrite an item's quantity; zero removes the item.
#[instrument(skip(state, request))]
pub async fn update(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<UpdateCartRequest>,
) -> Result<ApiResponse<CartCountData>> {
    let product_id = require_product_id(&request.product_id)?;
    let quantity = non_negative_quantity(request.quantity)?;

    state
        .cache()
        .update_item(user_id, product_id.clone(), quantity)
        .await;
    state.producer().publish(CartEvent::new(
        user_id,
        CartEventKind::Update {
            product_id,
            quantity,
        },
    ));

    let message = if quantity == 0 {
        "Item removed from cart"
    } else {
        "Cart item updated"
    };
    let total_items = state.cache().item_count(user_id).await;
    Ok(ApiResponse::ok(message, CartCountData { total_items }))
}

/// Remove an item. Removing an absent item succeeds and changes nothing.
#[instrument(skip(state))]
pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(product_id): Path<String>,
) -> Result<ApiResponse<CartCountData>> {
    let product_id = require_product_id(&product_id)?;

    state
        .cache()
        .remove_item(user_id, product_id.clone())
        .await;
    state
        .producer()
        .publish(CartEvent::new(user_id, CartEventKind::Remove { product_id }));

    let total_items = state.cache().item_count(user_id).await;
    Ok(ApiResponse::ok(
        "Item removed from cart",
        CartCountData { total_items },
    ))
}

/// Full cart for the authenticated user.
#[instrument(skip(state))]
pub async fn view(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<CartViewData>> {
    Ok(ApiResponse::ok("Cart retrieved", view_data(&state, user_id).await))
}

/// Full cart for an arbitrary user, for debug/admin use behind the gateway.
#[instrument(skip(state))]
pub async fn view_user(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Result<ApiResponse<CartViewData>> {
    let user_id = UserId::new(user_id);
    Ok(ApiResponse::ok("Cart retrieved", view_data(&state, user_id).await))
}

async fn view_data(state: &AppState, user_id: UserId) -> CartViewData {
    let items = state.cache().get_cart(user_id).await;
    let total_items = items.item_count();
    CartViewData { items, total_items }
}

/// Distinct-product count.
#[instrument(skip(state))]
pub async fn count(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<CartCountData>> {
    let total_items = state.cache().item_count(user_id).await;
    Ok(ApiResponse::ok(
        "Cart count retrieved",
        CartCountData { total_items },
    ))
}

/// Total unit count across all products.
#[instrument(skip(state))]
pub async fn total_quantity(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<TotalQuantityData>> {
    let total_quantity = state.cache().total_quantity(user_id).await;
    Ok(ApiResponse::ok(
        "Cart total retrieved",
        TotalQuantityData { total_quantity },
    ))
}

/// Empty the cart.
///
/// The cache empties immediately; the published sync event plus the
/// pending-sync marker guarantee the durable store converges to empty even
/// if one of the two paths is lost.
#[instrument(skip(state))]
pub async fn clear(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<CartCountData>> {
    state.cache().clear(user_id).await;
    state
        .producer()
        .publish(CartEvent::new(user_id, CartEventKind::Sync));

    Ok(ApiResponse::ok("Cart cleared", CartCountData { total_items: 0 }))
}

/// Hand the cart to the order pipeline and empty it.
///
/// Order creation itself belongs to the order service, which consumes the
/// checkout event; this endpoint only guarantees the cart is emptied and
/// the event queued. With `CART_CHECKOUT_BLOCKING` set, the durable clear
/// happens first: if it fails, the cache and the event stream are left
/// untouched and the client can retry.
#[instrument(skip(state, order_data))]
pub async fn checkout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(order_data): Json<serde_json::Value>,
) -> Result<ApiResponse<CartViewData>> {
    let items = state.cache().get_cart(user_id).await;
    if items.is_empty() {
        return Err(AppError::BadRequest(
            "cannot checkout an empty cart".to_string(),
        ));
    }

    if state.config().checkout_blocking {
        state.store().clear_cart(user_id).await?;
    }

    state.producer().publish(CartEvent::new(
        user_id,
        CartEventKind::Checkout {
            cart_items: items.clone(),
            order_data,
        },
    ));
    state.cache().clear(user_id).await;
    if state.config().checkout_blocking {
        state.pending().unmark(user_id);
    }

    let total_items = items.item_count();
    Ok(ApiResponse::ok(
        "Checkout submitted",
        CartViewData { items, total_items },
    ))
}

/// Forced synchronous reconciliation.
///
/// The auth service calls this from the logout flow so the cart is durable
/// before the session (and eventually the cache entry) goes away.
#[instrument(skip(state))]
pub async fn sync_now(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<CartCountData>> {
    let cart = state.cache().peek(user_id).await;
    state.store().persist_cart(user_id, &cart).await?;
    state.pending().unmark(user_id);

    Ok(ApiResponse::ok(
        "Cart synchronized",
        CartCountData {
            total_items: cart.item_count(),
        },
    ))
}
