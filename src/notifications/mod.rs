use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "Timestamp";
pub const SIGNATURE_HEADER: &str = "Storefront-Signature";

/// Notification delivery errors. These never fail an order confirmation.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Signing error: {0}")]
    Signing(String),
    #[error("Delivery failed after {attempts} attempt(s): {reason}")]
    Delivery { attempts: u32, reason: String },
    #[error("Delivery did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Delivers an order confirmation to a customer.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        order_id: Uuid,
        total_amount: Decimal,
    ) -> Result<(), NotificationError>;
}

/// The confirmation mail as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub order_id: Uuid,
    pub total_amount: Decimal,
}

impl ConfirmationMessage {
    pub fn render(store_name: &str, recipient: &str, order_id: Uuid, total_amount: Decimal) -> Self {
        let body = format!(
            "Dear Customer,\n\n\
             Thank you for your purchase! Your order has been confirmed.\n\n\
             Order Details:\n\
             Order ID: {order_id}\n\
             Total Amount: €{total_amount:.2}\n\n\
             We will process your order shortly.\n\n\
             Best regards,\n\
             {store_name} Team"
        );

        Self {
            to: recipient.to_string(),
            subject: format!("Order Confirmation - {}", store_name),
            body,
            order_id,
            total_amount,
        }
    }
}

fn check_recipient(recipient: &str) -> Result<(), NotificationError> {
    let trimmed = recipient.trim();
    let valid = trimmed
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(NotificationError::InvalidRecipient(recipient.to_string()))
    }
}

/// HMAC signature generator for relay authentication
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Hex HMAC-SHA256 over `"{timestamp}.{body}"`
    pub fn sign_payload(&self, timestamp: &str, body: &str) -> Result<String, NotificationError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| NotificationError::Signing(e.to_string()))?;
        mac.update(format!("{}.{}", timestamp, body).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Posts confirmation messages to an HTTP mail relay, retrying with exponential backoff.
#[derive(Clone)]
pub struct RelayNotifier {
    client: reqwest::Client,
    relay_url: String,
    store_name: String,
    signature_generator: Option<Arc<SignatureGenerator>>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl RelayNotifier {
    pub fn new(
        relay_url: impl Into<String>,
        config: &NotificationConfig,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotificationError::Delivery {
                attempts: 0,
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            relay_url: relay_url.into(),
            store_name: config.store_name.clone(),
            signature_generator: config
                .signing_secret
                .clone()
                .map(|secret| Arc::new(SignatureGenerator::new(secret))),
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_secs(1),
        })
    }

    /// Overrides the first retry delay; later retries double it.
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    async fn deliver(&self, message: &ConfirmationMessage) -> Result<(), NotificationError> {
        let body = serde_json::to_string(message)?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match &self.signature_generator {
            Some(generator) => Some(generator.sign_payload(&timestamp, &body)?),
            None => None,
        };

        let mut last_failure = String::new();
        for attempt in 1..=self.max_attempts {
            let mut request = self
                .client
                .post(&self.relay_url)
                .header("Content-Type", "application/json")
                .header(TIMESTAMP_HEADER, &timestamp)
                .body(body.clone());

            if let Some(sig) = &signature {
                request = request.header(SIGNATURE_HEADER, sig);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!(order_id = %message.order_id, attempt, "confirmation delivered");
                    return Ok(());
                }
                Ok(response) => {
                    last_failure = format!("relay answered {}", response.status());
                    warn!(
                        "Confirmation delivery failed with status: {} (attempt {}/{})",
                        response.status(),
                        attempt,
                        self.max_attempts
                    );
                }
                Err(e) => {
                    last_failure = e.to_string();
                    warn!(
                        "Confirmation delivery error: {} (attempt {}/{})",
                        e, attempt, self.max_attempts
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.base_backoff * 2_u32.pow(attempt - 1)).await;
            }
        }

        error!(
            order_id = %message.order_id,
            "Confirmation delivery failed after {} attempts", self.max_attempts
        );
        Err(NotificationError::Delivery {
            attempts: self.max_attempts,
            reason: last_failure,
        })
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    #[instrument(skip(self))]
    async fn send(
        &self,
        recipient: &str,
        order_id: Uuid,
        total_amount: Decimal,
    ) -> Result<(), NotificationError> {
        check_recipient(recipient)?;
        let message =
            ConfirmationMessage::render(&self.store_name, recipient, order_id, total_amount);
        self.deliver(&message).await
    }
}

/// Writes the rendered confirmation to the log. Used when no relay is configured.
#[derive(Clone)]
pub struct LogNotifier {
    store_name: String,
}

impl LogNotifier {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        recipient: &str,
        order_id: Uuid,
        total_amount: Decimal,
    ) -> Result<(), NotificationError> {
        check_recipient(recipient)?;
        let message =
            ConfirmationMessage::render(&self.store_name, recipient, order_id, total_amount);
        info!(
            to = %message.to,
            subject = %message.subject,
            %order_id,
            "order confirmation (log delivery)"
        );
        Ok(())
    }
}

/// Picks the relay notifier when a relay URL is configured, the log notifier otherwise.
pub fn notifier_from_config(
    config: &NotificationConfig,
) -> Result<Arc<dyn Notifier>, NotificationError> {
    match &config.relay_url {
        Some(url) => Ok(Arc::new(RelayNotifier::new(url.clone(), config)?)),
        None => Ok(Arc::new(LogNotifier::new(config.store_name.clone()))),
    }
}
