use crate::errors::{ApiError, ServiceError};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Header carrying the client's cart identifier
pub const CART_ID_HEADER: &str = "x-cart-id";

const MAX_CART_ID_LEN: usize = 128;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard no content response
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

/// The cart a request operates on, taken from the `x-cart-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartScope(pub String);

impl CartScope {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(ApiError::ValidationError(format!(
                "{} header must not be blank",
                CART_ID_HEADER
            )));
        }
        if id.len() > MAX_CART_ID_LEN
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ApiError::ValidationError(format!(
                "{} header is malformed",
                CART_ID_HEADER
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CartScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CART_ID_HEADER)
            .ok_or_else(|| ApiError::ValidationError(format!("missing {} header", CART_ID_HEADER)))?
            .to_str()
            .map_err(|_| ApiError::ValidationError(format!("{} header is malformed", CART_ID_HEADER)))?;

        CartScope::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_scope_trims_and_checks() {
        assert_eq!(CartScope::parse("  cart-1 ").unwrap().as_str(), "cart-1");
        assert!(CartScope::parse("   ").is_err());
        assert!(CartScope::parse("cart 1").is_err());
        assert!(CartScope::parse(&"c".repeat(129)).is_err());
    }
}
