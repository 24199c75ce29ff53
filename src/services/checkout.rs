use crate::{
    config::GatewayConfig,
    entities::{cart_line, checkout_session, checkout_session::SnapshotLine},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CreateSessionRequest, GatewayLineItem, PaymentGateway},
    money,
    services::cart::load_lines,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Redirect targets handed to the gateway with every session.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// May contain `{CHECKOUT_SESSION_ID}`, which the gateway fills in.
    pub success_url: String,
    pub cancel_url: String,
}

impl From<&GatewayConfig> for CheckoutUrls {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            success_url: cfg.success_url.clone(),
            cancel_url: cfg.cancel_url.clone(),
        }
    }
}

/// Turns a cart into a priced gateway session and records the snapshot.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    urls: CheckoutUrls,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            urls,
        }
    }

    /// Creates a gateway session for the cart's current lines.
    ///
    /// Nothing is persisted unless the gateway accepts the session. The cart is
    /// left untouched; it is cleared only once payment is confirmed.
    #[instrument(skip(self))]
    pub async fn create_session(
        &self,
        cart_id: &str,
    ) -> Result<checkout_session::Model, ServiceError> {
        let lines = load_lines(&*self.db, cart_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("empty cart".to_string()));
        }

        let snapshot = snapshot_lines(&lines)?;
        let request = self.session_request(cart_id, &snapshot);
        let amount_total_minor = request.amount_total_minor();

        let created = self.gateway.create_session(&request).await.map_err(|e| {
            warn!(cart_id, error = %e, "gateway refused checkout session");
            ServiceError::from(e)
        })?;

        let session = checkout_session::ActiveModel {
            session_id: Set(created.session_id.clone()),
            cart_id: Set(cart_id.to_string()),
            line_snapshot: Set(serde_json::to_value(&snapshot)?),
            amount_total_minor: Set(amount_total_minor),
            currency: Set(request.currency.clone()),
            redirect_url: Set(created.redirect_url.clone()),
            created_at: Set(Utc::now()),
        };

        let session = session.insert(&*self.db).await.map_err(|e| {
            error!(
                session_id = %created.session_id,
                error = %e,
                "gateway session created but could not be recorded"
            );
            ServiceError::DatabaseError(e)
        })?;

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                cart_id: cart_id.to_string(),
                session_id: session.session_id.clone(),
                amount_total_minor,
            })
            .await;

        info!(
            "Created checkout session {} for cart {} ({} lines, {} minor units)",
            session.session_id,
            cart_id,
            snapshot.len(),
            amount_total_minor
        );
        Ok(session)
    }

    fn session_request(&self, cart_id: &str, snapshot: &[SnapshotLine]) -> CreateSessionRequest {
        CreateSessionRequest {
            line_items: snapshot
                .iter()
                .map(|line| GatewayLineItem {
                    name: line.name.clone(),
                    description: line.description.clone(),
                    unit_amount_minor: line.unit_amount_minor,
                    quantity: line.quantity,
                })
                .collect(),
            currency: money::CHECKOUT_CURRENCY.to_string(),
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
            collect_billing_address: true,
            create_customer: true,
            client_reference_id: Some(cart_id.to_string()),
        }
    }
}

/// Prices each line once, in minor units, from its own unit price.
pub fn snapshot_lines(lines: &[cart_line::Model]) -> Result<Vec<SnapshotLine>, ServiceError> {
    let mut total: i64 = 0;
    let mut snapshot = Vec::with_capacity(lines.len());

    for line in lines {
        let unit_amount_minor = money::to_minor_units(line.unit_price)?;
        let line_total = money::line_total_minor(unit_amount_minor, line.quantity)?;
        total = total
            .checked_add(line_total)
            .ok_or_else(|| ServiceError::ValidationError("cart total overflows".to_string()))?;

        snapshot.push(SnapshotLine {
            product_id: line.product_id.clone(),
            name: line.name.clone(),
            description: line.description.clone(),
            unit_price: money::normalize(line.unit_price),
            unit_amount_minor,
            quantity: line.quantity,
        });
    }

    Ok(snapshot)
}
