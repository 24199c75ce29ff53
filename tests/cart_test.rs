//! Cart behaviour: merging repeated adds, catalog pricing, editing and clearing.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use proptest::prelude::*;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::errors::ServiceError;

#[tokio::test]
async fn adding_the_same_product_twice_merges_into_one_line() {
    let app = TestApp::new().await;
    app.seed_product("P10", "Filter Papers", None, dec!(10.00), true)
        .await;
    let cart = &app.state.services.cart;

    cart.add_item("cart-b", "P10", 2).await.unwrap();
    let line = cart.add_item("cart-b", "P10", 3).await.unwrap();

    assert_eq!(line.quantity, 5);
    let lines = cart.list_items("cart-b").await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].product_id, "P10");
    assert_eq!(lines[0].quantity, 5);
    assert_eq!(lines[0].unit_price, dec!(10.00));
}

#[tokio::test]
async fn name_description_and_price_come_from_the_catalog() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;

    let line = cart.add_item("cart-1", "P1", 1).await.unwrap();
    assert_eq!(line.name, "Espresso Beans");
    assert_eq!(line.description.as_deref(), Some("Dark roast, 1kg"));
    assert_eq!(line.unit_price, dec!(19.99));

    app.reprice("P1", dec!(21.50)).await;
    let merged = cart.add_item("cart-1", "P1", 1).await.unwrap();
    assert_eq!(merged.quantity, 2);
    assert_eq!(merged.unit_price, dec!(21.50), "merge refreshes the price");
}

#[tokio::test]
async fn unknown_or_inactive_products_are_not_found() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;

    assert!(matches!(
        cart.add_item("cart-1", "NOPE", 1).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        cart.add_item("cart-1", "P3", 1).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(cart.list_items("cart-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn non_positive_quantities_are_rejected() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;

    for quantity in [0, -1] {
        assert!(matches!(
            cart.add_item("cart-1", "P1", quantity).await,
            Err(ServiceError::ValidationError(_))
        ));
    }
}

#[tokio::test]
async fn quantity_overflow_is_a_validation_error() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;

    cart.add_item("cart-1", "P1", i32::MAX).await.unwrap();
    assert!(matches!(
        cart.add_item("cart-1", "P1", 1).await,
        Err(ServiceError::ValidationError(_))
    ));
    assert_eq!(cart.list_items("cart-1").await.unwrap()[0].quantity, i32::MAX);
}

#[tokio::test]
async fn concurrent_adds_of_one_product_are_all_counted() {
    let app = TestApp::new().await;
    let cart = app.state.services.cart.clone();

    let adds = (0..10).map(|_| {
        let cart = cart.clone();
        async move { cart.add_item("cart-c", "P1", 1).await }
    });
    let results = futures::future::join_all(adds).await;
    assert!(results.iter().all(Result::is_ok));

    let lines = cart.list_items("cart-c").await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 10);
}

#[tokio::test]
async fn carts_are_isolated_from_each_other() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;

    cart.add_item("cart-a", "P1", 1).await.unwrap();
    cart.add_item("cart-b", "P2", 4).await.unwrap();

    let a = cart.list_items("cart-a").await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].product_id, "P1");
}

#[tokio::test]
async fn summary_counts_items_and_subtotal() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;

    cart.add_item("cart-1", "P1", 3).await.unwrap();
    cart.add_item("cart-1", "P2", 1).await.unwrap();

    let summary = cart.summary("cart-1").await.unwrap();
    assert_eq!(summary.item_count, 4);
    assert_eq!(summary.subtotal, dec!(105.47));
    assert_eq!(summary.lines[0].product_id, "P1", "lines keep insertion order");
}

#[tokio::test]
async fn update_quantity_sets_or_removes_the_line() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    cart.add_item("cart-1", "P1", 2).await.unwrap();

    let updated = cart.update_quantity("cart-1", "P1", 7).await.unwrap();
    assert_eq!(updated.map(|l| l.quantity), Some(7));

    assert!(matches!(
        cart.update_quantity("cart-1", "P1", -2).await,
        Err(ServiceError::ValidationError(_))
    ));
    assert!(matches!(
        cart.update_quantity("cart-1", "P2", 1).await,
        Err(ServiceError::NotFound(_))
    ));

    assert!(cart.update_quantity("cart-1", "P1", 0).await.unwrap().is_none());
    assert!(cart.list_items("cart-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_and_clear() {
    let app = TestApp::new().await;
    let cart = &app.state.services.cart;
    cart.add_item("cart-1", "P1", 1).await.unwrap();
    cart.add_item("cart-1", "P2", 1).await.unwrap();

    cart.remove_item("cart-1", "P1").await.unwrap();
    assert_eq!(cart.list_items("cart-1").await.unwrap().len(), 1);
    assert!(matches!(
        cart.remove_item("cart-1", "P1").await,
        Err(ServiceError::NotFound(_))
    ));

    assert_eq!(cart.clear("cart-1").await.unwrap(), 1);
    assert_eq!(cart.clear("cart-1").await.unwrap(), 0);
}

#[tokio::test]
async fn cart_endpoints_round_trip_over_http() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/cart/items",
            Some(json!({"productId": "P1", "quantity": 2})),
            Some("web-cart"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let line = response_json(response).await;
    assert_eq!(line["productId"], "P1");
    assert_eq!(line["quantity"], 2);
    assert_eq!(line["lineTotal"], "39.98");

    let response = app
        .request(
            Method::PUT,
            "/api/cart/items/P1",
            Some(json!({"quantity": 5})),
            Some("web-cart"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::GET, "/api/cart/items", None, Some("web-cart"))
        .await;
    let summary = response_json(response).await;
    assert_eq!(summary["cartId"], "web-cart");
    assert_eq!(summary["itemCount"], 5);
    assert_eq!(summary["subtotal"], "99.95");

    let response = app
        .request(Method::DELETE, "/api/cart/items/P1", None, Some("web-cart"))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .request(Method::DELETE, "/api/cart", None, Some("web-cart"))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn cart_endpoints_require_a_cart_header() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/cart/items", None, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(Method::GET, "/api/cart/items", None, Some("   "))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn add_item_maps_errors_to_status_codes() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/cart/items",
            Some(json!({"productId": "P1", "quantity": 0})),
            Some("web-cart"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/api/cart/items",
            Some(json!({"productId": "GHOST", "quantity": 1})),
            Some("web-cart"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert!(body["request_id"].is_string(), "error bodies carry the request id");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn merged_quantity_is_the_sum_of_adds(quantities in proptest::collection::vec(1i32..1_000, 1..6)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (line_count, quantity) = runtime.block_on(async {
            let app = TestApp::new().await;
            let cart = &app.state.services.cart;
            for q in &quantities {
                cart.add_item("cart-p", "P2", *q).await.unwrap();
            }
            let lines = cart.list_items("cart-p").await.unwrap();
            (lines.len(), lines[0].quantity)
        });

        prop_assert_eq!(line_count, 1);
        prop_assert_eq!(quantity, quantities.iter().sum::<i32>());
    }
}
