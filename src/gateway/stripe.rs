use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{CreateSessionRequest, CreatedSession, GatewayError, PaymentGateway, SessionFacts};
use crate::config::GatewayConfig;

const SESSIONS_PATH: &str = "/v1/checkout/sessions";

/// Checkout Sessions client for a Stripe-compatible REST API.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    url: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    customer_email: Option<String>,
    customer_details: Option<CustomerDetails>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    /// Builds a client whose every call is bounded by `timeout_secs`.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}{}", self.api_base_url, SESSIONS_PATH)
    }

    /// Form body in the gateway's bracketed field notation.
    fn session_form(request: &CreateSessionRequest) -> Vec<(String, String)> {
        let currency = request.currency.to_ascii_lowercase();
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];

        if request.collect_billing_address {
            form.push((
                "billing_address_collection".to_string(),
                "required".to_string(),
            ));
        }
        if request.create_customer {
            form.push(("customer_creation".to_string(), "always".to_string()));
        }
        if let Some(reference) = &request.client_reference_id {
            form.push(("client_reference_id".to_string(), reference.clone()));
        }

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                currency.clone(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_minor.to_string(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            // Empty descriptions are rejected upstream
            if let Some(description) = item.description.as_deref().filter(|d| !d.trim().is_empty())
            {
                form.push((
                    format!("{}[price_data][product_data][description]", prefix),
                    description.to_string(),
                ));
            }
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        form
    }

    async fn rejection(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let message = match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => envelope
                .error
                .message
                .unwrap_or_else(|| "no message".to_string()),
            Err(_) => "unreadable error body".to_string(),
        };
        GatewayError::Rejected { status, message }
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Transport(format!("request timed out: {}", err))
    } else {
        GatewayError::Transport(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, GatewayError> {
        let response = self
            .client
            .post(self.sessions_url())
            .bearer_auth(&self.secret_key)
            .form(&Self::session_form(request))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let err = Self::rejection(response).await;
            warn!(error = %err, "checkout session creation rejected");
            return Err(err);
        }

        let session: SessionObject = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let redirect_url = session
            .url
            .ok_or_else(|| GatewayError::Decode("session has no redirect url".to_string()))?;

        debug!(session_id = %session.id, "checkout session created");
        Ok(CreatedSession {
            session_id: session.id,
            redirect_url,
        })
    }

    #[instrument(skip(self))]
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionFacts>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/{}", self.sessions_url(), session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let session: SessionObject = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let customer_email = session
            .customer_details
            .and_then(|details| details.email)
            .or(session.customer_email);
        let amount_total_minor = session
            .amount_total
            .ok_or_else(|| GatewayError::Decode("session has no amount_total".to_string()))?;

        Ok(Some(SessionFacts {
            paid: session.payment_status.as_deref() == Some("paid"),
            customer_email,
            amount_total_minor,
            session_id: session.id,
        }))
    }
}
