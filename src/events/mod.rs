use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events raised by the cart, checkout and order services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CartItemAdded {
        cart_id: String,
        product_id: String,
        quantity: i32,
    },
    CartCleared {
        cart_id: String,
    },
    CheckoutSessionCreated {
        cart_id: String,
        session_id: String,
        amount_total_minor: i64,
    },
    OrderConfirmed {
        order_id: Uuid,
        session_id: String,
        total_amount: Decimal,
    },
    OrderPaymentFailed {
        order_id: Uuid,
        session_id: String,
    },
    NotificationFailed {
        order_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Request-path variant: a closed channel is logged, never returned to the caller.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Creates a bounded channel and the sender half wrapped for services.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::NotificationFailed { order_id, reason } => {
                warn!(%order_id, %reason, "order confirmation was not delivered");
            }
            Event::OrderPaymentFailed {
                order_id,
                session_id,
            } => {
                warn!(%order_id, %session_id, "payment not completed");
            }
            other => info!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}
