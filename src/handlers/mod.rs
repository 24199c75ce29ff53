pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;

use crate::{
    catalog::CatalogLookup,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    notifications::Notifier,
    services::{CartService, CheckoutService, CheckoutUrls, OrderService},
};
use std::{sync::Arc, time::Duration};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        catalog: Arc<dyn CatalogLookup>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        urls: CheckoutUrls,
        notify_timeout: Duration,
    ) -> Self {
        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            catalog,
            event_sender.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            gateway.clone(),
            event_sender.clone(),
            urls,
        ));
        let orders = Arc::new(
            OrderService::new(db_pool, gateway, notifier, event_sender)
                .with_notify_timeout(notify_timeout),
        );

        Self {
            cart,
            checkout,
            orders,
        }
    }
}
