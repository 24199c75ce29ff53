//! Storefront API
//!
//! Cart, hosted checkout sessions and payment-confirmed orders for a small online store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod catalog;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod money;
pub mod notifications;
pub mod services;
pub mod tracing;

use axum::Router;
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

use crate::{
    catalog::ProductCatalog, config::AppConfig, events::EventSender, gateway::PaymentGateway,
    handlers::AppServices, notifications::Notifier, services::CheckoutUrls,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

impl AppState {
    /// Wires the services against the product table of `db` and the given collaborators.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let event_sender = Arc::new(event_sender);
        let catalog = Arc::new(ProductCatalog::new(db.clone()));
        let services = AppServices::new(
            db.clone(),
            event_sender.clone(),
            catalog,
            gateway,
            notifier,
            CheckoutUrls::from(&config.gateway),
            config.notification_budget(),
        );

        Self {
            db,
            config: Arc::new(config),
            event_sender,
            services,
        }
    }
}

/// Routes served under `/api`
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(handlers::cart::cart_routes())
        .merge(handlers::checkout::checkout_routes())
        .merge(handlers::orders::order_routes())
}

/// Full application router with the HTTP middleware stack applied
pub fn build_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let cors = cors_layer(&state.config);

    let mut app = Router::new()
        .merge(handlers::health::health_routes())
        .nest("/api", api_routes())
        .with_state(state)
        .layer(TimeoutLayer::new(timeout));

    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    app.layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}

/// Explicit origins when configured, permissive outside production, none otherwise.
fn cors_layer(cfg: &AppConfig) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
    } else if !cfg.is_production() {
        Some(CorsLayer::permissive())
    } else {
        ::tracing::warn!("no CORS origins configured; cross-origin requests will be refused");
        None
    }
}
