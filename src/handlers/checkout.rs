use crate::handlers::common::{map_service_error, success_response, CartScope};
use crate::handlers::orders::ConfirmOrderResponse;
use crate::{
    entities::checkout_session, errors::ApiError, money, services::ConfirmationOutcome, AppState,
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkout", post(create_checkout_session))
        .route("/checkout/success", get(checkout_success))
}

/// Start a payment session for the caller's cart
async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    cart: CartScope,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .create_session(cart.as_str())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CheckoutSessionResponse::from(session)))
}

/// Landing target for the gateway's success redirect; reconciles the session the same
/// way `POST /orders/confirm` does.
async fn checkout_success(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuccessParams>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = params
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest {
            message: "session_id query parameter is required".to_string(),
        })?;

    let outcome = state
        .services
        .orders
        .confirm_order(session_id)
        .await
        .and_then(ConfirmationOutcome::into_result)
        .map_err(map_service_error)?;

    Ok(success_response(ConfirmOrderResponse::from(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct SuccessParams {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub redirect_url: String,
    pub amount_total: Decimal,
    pub currency: String,
}

impl From<checkout_session::Model> for CheckoutSessionResponse {
    fn from(session: checkout_session::Model) -> Self {
        Self {
            amount_total: money::from_minor_units(session.amount_total_minor),
            session_id: session.session_id,
            redirect_url: session.redirect_url,
            currency: session.currency,
        }
    }
}
