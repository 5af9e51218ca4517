//! HTTP route handlers for the cart service.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                    - Liveness check
//! GET    /health/ready              - Readiness check (database)
//!
//! # Cart operations (require gateway identity header)
//! POST   /cart/add                  - Add item (quantities accumulate)
//! PUT    /cart/update               - Overwrite quantity (0 removes)
//! DELETE /cart/remove/{product_id}  - Remove item (idempotent)
//! GET    /cart/view                 - Full cart + distinct-item count
//! GET    /cart/count                - Distinct-product count
//! GET    /cart/total-quantity       - Total unit count
//! DELETE /cart/clear                - Empty the cart
//! POST   /cart/checkout             - Emit checkout event, empty the cart
//! POST   /cart/sync                 - Forced synchronous reconciliation
//!                                     (used by the auth service on logout)
//!
//! # Debug/admin
//! GET    /cart/view/{user_id}       - View any user's cart, no identity
//!                                     header required
//! ```
//!
//! Every response carries the `{ success, message, data }` envelope.

pub mod cart;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Standard response envelope for all cart endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful response with a payload.
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl<T: Serialize> axum::response::IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        axum::Json(self).into_response()
    }
}

/// Create the cart routes router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart/add", post(cart::add))
        .route("/cart/update", put(cart::update))
        .route("/cart/remove/{product_id}", delete(cart::remove))
        .route("/cart/view", get(cart::view))
        .route("/cart/view/{user_id}", get(cart::view_user))
        .route("/cart/count", get(cart::count))
        .route("/cart/total-quantity", get(cart::total_quantity))
        .route("/cart/clear", delete(cart::clear))
        .route("/cart/checkout", post(cart::checkout))
        .route("/cart/sync", post(cart::sync_now))
}
