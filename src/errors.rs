use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::gateway::GatewayError;

/// Seconds a client should wait before retrying after a gateway failure
pub const GATEWAY_RETRY_AFTER_SECS: u64 = 5;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standard error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Payment not completed for session {0}")]
    PaymentIncomplete(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::GatewayError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::InternalError(format!("serialization failed: {}", err))
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::PaymentIncomplete(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Gateway failures are transient; everything else is final for the given input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayError(_))
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::PaymentIncomplete(session_id) => {
                format!("Payment was not completed for session {}", session_id)
            }
            _ => self.to_string(),
        }
    }
}

fn error_body(status: StatusCode, message: String) -> ErrorResponse {
    ErrorResponse {
        error: status.canonical_reason().unwrap_or("Error").to_string(),
        message,
        details: None,
        request_id: current_request_id(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = error_body(status, self.response_message());
        let mut response = (status, Json(body)).into_response();

        if self.is_retryable() {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(GATEWAY_RETRY_AFTER_SECS),
            );
        }

        response
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {message}")]
    BadRequest { message: String },
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(service_error) => service_error.into_response(),
            ApiError::ValidationError(msg) => {
                let body = error_body(StatusCode::BAD_REQUEST, msg);
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            ApiError::BadRequest { message } => {
                let body = error_body(StatusCode::BAD_REQUEST, message);
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}
