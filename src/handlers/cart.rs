use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input, CartScope,
};
use crate::{entities::cart_line, errors::ApiError, money, services::CartSummary, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cart", delete(clear_cart))
        .route("/cart/items", get(list_items).post(add_item))
        .route(
            "/cart/items/:product_id",
            put(update_item).delete(remove_item),
        )
}

/// Add a product to the cart, merging with an existing line
async fn add_item(
    State(state): State<Arc<AppState>>,
    cart: CartScope,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let line = state
        .services
        .cart
        .add_item(cart.as_str(), &payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartLineResponse::from(line)))
}

async fn list_items(
    State(state): State<Arc<AppState>>,
    cart: CartScope,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .services
        .cart
        .summary(cart.as_str())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(summary)))
}

/// Set a line's quantity; zero removes it
async fn update_item(
    State(state): State<Arc<AppState>>,
    cart: CartScope,
    Path(product_id): Path<String>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let line = state
        .services
        .cart
        .update_quantity(cart.as_str(), &product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(match line {
        Some(line) => success_response(CartLineResponse::from(line)),
        None => no_content_response(),
    })
}

async fn remove_item(
    State(state): State<Arc<AppState>>,
    cart: CartScope,
    Path(product_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_item(cart.as_str(), &product_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

async fn clear_cart(
    State(state): State<Arc<AppState>>,
    cart: CartScope,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .clear(cart.as_str())
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub product_id: String,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0, message = "quantity cannot be negative"))]
    pub quantity: i32,
}

// Response DTOs

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineResponse {
    pub product_id: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

impl From<cart_line::Model> for CartLineResponse {
    fn from(line: cart_line::Model) -> Self {
        let line_total = money::normalize(line.unit_price * Decimal::from(line.quantity));
        Self {
            product_id: line.product_id,
            name: line.name,
            description: line.description,
            unit_price: money::normalize(line.unit_price),
            quantity: line.quantity,
            line_total,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub cart_id: String,
    pub lines: Vec<CartLineResponse>,
    pub item_count: i64,
    pub subtotal: Decimal,
}

impl From<CartSummary> for CartResponse {
    fn from(summary: CartSummary) -> Self {
        Self {
            cart_id: summary.cart_id,
            lines: summary.lines.into_iter().map(CartLineResponse::from).collect(),
            item_count: summary.item_count,
            subtotal: summary.subtotal,
        }
    }
}
