use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    entities::{checkout_session::SnapshotLine, order, order::OrderStatus},
    errors::{ApiError, ServiceError},
    services::ConfirmationOutcome,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for order endpoints
pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/confirm", post(confirm_order))
        .route("/orders/:session_id", get(get_order))
}

/// Confirm a paid checkout session and materialize its order.
///
/// Safe to repeat: later calls for the same session answer with the stored order and
/// `replayed: true`. An unpaid session answers 402.
async fn confirm_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .orders
        .confirm_order(payload.session_id.trim())
        .await
        .and_then(ConfirmationOutcome::into_result)
        .map_err(map_service_error)?;

    Ok(success_response(ConfirmOrderResponse::from(outcome)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(&session_id)
        .await
        .map_err(map_service_error)?;

    let response = OrderResponse::try_from(order).map_err(map_service_error)?;
    Ok(success_response(response))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "sessionId is required"))]
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderResponse {
    pub order_confirmed: bool,
    pub notified: bool,
    pub replayed: bool,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
}

impl From<ConfirmationOutcome> for ConfirmOrderResponse {
    fn from(outcome: ConfirmationOutcome) -> Self {
        let notified = outcome.notified();
        let replayed = outcome.is_replay();
        let order = outcome.order();
        Self {
            order_confirmed: order.status == OrderStatus::Paid,
            notified,
            replayed,
            order_id: order.id,
            status: order.status,
            total_amount: order.total_amount,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub session_id: String,
    pub status: OrderStatus,
    pub customer_email: Option<String>,
    pub total_amount: Decimal,
    pub currency: String,
    pub items: Vec<SnapshotLine>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<order::Model> for OrderResponse {
    type Error = ServiceError;

    fn try_from(order: order::Model) -> Result<Self, Self::Error> {
        let items = order.lines()?;
        Ok(Self {
            id: order.id,
            session_id: order.session_id,
            status: order.status,
            customer_email: order.customer_email,
            total_amount: order.total_amount,
            currency: order.currency,
            items,
            notified: order.notified_at.is_some(),
            created_at: order.created_at,
        })
    }
}
