// src/gateway.rs
//
// Checkout provider seam. The service only needs two calls: open a hosted
// checkout session and read back its payment status.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("provider api error status={status} body={body}")]
    Api { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid api base url: {0}")]
    InvalidBaseUrl(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub currency: String,
    /// Smallest currency unit (cents).
    pub unit_amount: i64,
    pub product_name: String,
    pub quantity: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub client_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub payment_status: String,
    pub client_reference: Option<String>,
}

impl SessionStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_session(
        &self,
        req: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError>;
}

/// Stripe Checkout over its REST API (form-encoded requests, bearer secret key).
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: Url,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    payment_status: Option<String>,
    client_reference_id: Option<String>,
}

impl StripeGateway {
    pub fn new(
        api_base: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let api_base = Url::parse(api_base)
            .map_err(|e| GatewayError::InvalidBaseUrl(format!("{api_base}: {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(GatewayError::InvalidBaseUrl(api_base.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_base,
            secret_key: secret_key.to_string(),
        })
    }

    /// Appends `segments` to the api base, percent-encoding each one so a
    /// caller-supplied id stays a single path segment.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidBaseUrl(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn read_session(resp: reqwest::Response) -> Result<StripeSession, GatewayError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<StripeSession>(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))
    }
}

pub(crate) fn session_form(req: &CheckoutSessionRequest) -> Vec<(&'static str, String)> {
    vec![
        ("mode", "payment".to_string()),
        ("payment_method_types[0]", "card".to_string()),
        ("line_items[0][price_data][currency]", req.currency.clone()),
        (
            "line_items[0][price_data][product_data][name]",
            req.product_name.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            req.unit_amount.to_string(),
        ),
        ("line_items[0][quantity]", req.quantity.to_string()),
        ("success_url", req.success_url.clone()),
        ("cancel_url", req.cancel_url.clone()),
        ("client_reference_id", req.client_reference.clone()),
    ]
}

#[async_trait]
impl CheckoutGateway for StripeGateway {
    async fn create_session(
        &self,
        req: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let resp = self
            .client
            .post(self.endpoint(&["v1", "checkout", "sessions"])?)
            .bearer_auth(&self.secret_key)
            .form(&session_form(&req))
            .send()
            .await?;

        let session = Self::read_session(resp).await?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::InvalidResponse("session has no url".to_string()))?;

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError> {
        let resp = self
            .client
            .get(self.endpoint(&["v1", "checkout", "sessions", session_id])?)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let session = Self::read_session(resp).await?;
        log::info!(
            "stripe session id={} payment_status={:?} client_reference_id={:?}",
            session.id,
            session.payment_status,
            session.client_reference_id
        );

        Ok(SessionStatus {
            payment_status: session.payment_status.unwrap_or_default(),
            client_reference: session.client_reference_id.filter(|r| !r.is_empty()),
        })
    }
}
