//! Payment gateway boundary.
//!
//! The gateway hosts the payment page. This service only creates sessions on
//! it and later asks it whether a session was paid.

mod stripe;

pub use stripe::StripeGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One priced line as the gateway should display and charge it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLineItem {
    pub name: String,
    pub description: Option<String>,
    pub unit_amount_minor: i64,
    pub quantity: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub line_items: Vec<GatewayLineItem>,
    /// ISO 4217 code
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Ask the buyer for a billing address; this also collects their email.
    pub collect_billing_address: bool,
    pub create_customer: bool,
    /// Our cart id, echoed back by the gateway for reconciliation
    pub client_reference_id: Option<String>,
}

impl CreateSessionRequest {
    /// What the gateway will be asked to collect, in minor units.
    pub fn amount_total_minor(&self) -> i64 {
        self.line_items
            .iter()
            .map(|item| item.unit_amount_minor * i64::from(item.quantity))
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// Authoritative payment facts for a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionFacts {
    pub session_id: String,
    pub paid: bool,
    pub customer_email: Option<String>,
    pub amount_total_minor: i64,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Transport(String),

    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, GatewayError>;

    /// `Ok(None)` when the gateway has no such session.
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionFacts>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(unit_amount_minor: i64, quantity: i32) -> GatewayLineItem {
        GatewayLineItem {
            name: "Widget".into(),
            description: None,
            unit_amount_minor,
            quantity,
        }
    }

    #[test]
    fn amount_total_sums_rounded_lines() {
        let request = CreateSessionRequest {
            line_items: vec![item(1999, 3), item(1000, 2), item(1, 1)],
            currency: "EUR".into(),
            success_url: "https://shop.test/success".into(),
            cancel_url: "https://shop.test/cart".into(),
            collect_billing_address: true,
            create_customer: true,
            client_reference_id: None,
        };
        assert_eq!(request.amount_total_minor(), 5997 + 2000 + 1);
    }
}
