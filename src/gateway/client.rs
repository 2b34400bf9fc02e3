//! Outbound payment gateway API.
//!
//! The gateway owns payment orders; the engine only creates them and fetches
//! them back at verification time. Both calls happen before any local write,
//! so a timeout leaves no partial state: creation is safely retried by the
//! client with a fresh order, and fetch (an idempotent GET) is retried here
//! with backoff.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use crate::config::{GatewayConfig, Secret};
use crate::error::{EngineError, Result};
use crate::reliability::{retry_with_backoff, RetryPolicy};

/// Order creation payload, amounts in the gateway's minor currency unit.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in minor units (paise).
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Receipt identifier, at most 40 characters.
    pub receipt: String,
    /// Metadata linking the order back to the purchasing user.
    pub notes: BTreeMap<String, String>,
}

/// A payment order as represented by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// Gateway order id.
    pub id: String,
    /// Amount in minor units (paise).
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Receipt identifier echoed back.
    pub receipt: String,
    /// Gateway-side order status.
    #[serde(default)]
    pub status: Option<String>,
    /// Metadata attached at creation.
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

impl GatewayOrder {
    /// Amount converted back to major currency units.
    #[must_use]
    pub fn amount_major(&self) -> i64 {
        self.amount / 100
    }
}

/// The gateway's order API, behind a seam for tests and emulation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment order.
    ///
    /// # Errors
    ///
    /// Returns a transient error on transport failure or gateway rejection;
    /// nothing is persisted locally either way.
    async fn create_order(&self, request: CreateOrderRequest) -> Result<GatewayOrder>;

    /// Fetches an existing order by id.
    ///
    /// # Errors
    ///
    /// Returns a transient error on transport failure, or a gateway error if
    /// the order is unknown.
    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder>;
}

/// HTTPS [`PaymentGateway`] implementation.
///
/// Uses a pooled client with bounded connect and request timeouts;
/// authenticates with HTTP basic auth (key id / key secret).
#[derive(Debug)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: Url,
    key_id: String,
    key_secret: Secret,
    retry: RetryPolicy,
}

impl HttpPaymentGateway {
    /// Builds a gateway client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration fails validation or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| EngineError::Config(format!("invalid gateway base_url: {e}")))?;
        Ok(Self {
            client,
            base_url,
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            retry: RetryPolicy::default(),
        })
    }

    fn orders_endpoint(&self, order_id: Option<&str>) -> Result<Url> {
        let path = match order_id {
            Some(id) => format!("/v1/orders/{id}"),
            None => "/v1/orders".to_owned(),
        };
        self.base_url
            .join(&path)
            .map_err(|e| EngineError::Gateway(format!("invalid order endpoint: {e}")))
    }

    async fn fetch_once(&self, order_id: &str) -> Result<GatewayOrder> {
        let url = self.orders_endpoint(Some(order_id))?;
        let response = self
            .client
            .get(url)
            .basic_auth(&self.key_id, Some(self.key_secret.expose()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Gateway(format!(
                "order fetch returned status {}",
                response.status()
            )));
        }
        response
            .json::<GatewayOrder>()
            .await
            .map_err(|e| EngineError::Gateway(format!("malformed order response: {e}")))
    }
}

/// Order ids travel into a URL path; restrict them to the gateway's id
/// alphabet before building the request.
fn validate_order_id(order_id: &str) -> Result<()> {
    if order_id.is_empty()
        || order_id.len() > 64
        || !order_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(EngineError::Validation(format!("malformed order id: {order_id}")));
    }
    Ok(())
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(receipt = %request.receipt))]
    async fn create_order(&self, request: CreateOrderRequest) -> Result<GatewayOrder> {
        let url = self.orders_endpoint(None)?;
        let response = self
            .client
            .post(url)
            .basic_auth(&self.key_id, Some(self.key_secret.expose()))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Gateway(format!(
                "order creation returned status {}",
                response.status()
            )));
        }
        response
            .json::<GatewayOrder>()
            .await
            .map_err(|e| EngineError::Gateway(format!("malformed order response: {e}")))
    }

    #[instrument(skip(self))]
    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder> {
        validate_order_id(order_id)?;
        retry_with_backoff(&self.retry, || self.fetch_once(order_id)).await
    }
}
