//! Gateway identity extractor.
//!
//! The PycShop gateway verifies credentials and forwards the caller's
//! identity as a trusted header; this service does not re-verify tokens.
//! Only the gateway can reach this service, so the header is trusted as-is.

use axum::{extract::FromRequestParts, http::request::Parts};
use pycshop_core::UserId;

use crate::error::AppError;

/// Header carrying the authenticated user ID, set by the gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extractor that requires a gateway-authenticated user.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(AuthUser(user_id): AuthUser) -> impl IntoResponse {
///     format!("cart for {user_id}")
/// }
/// ```
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing user identity".to_string()))?;

        let user_id = raw
            .trim()
            .parse::<i32>()
            .map_err(|_| AppError::Unauthorized("invalid user identity".to_string()))?;

        Ok(Self(UserId::new(user_id)))
    }
}
