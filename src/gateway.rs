//! Remote payment gateway client.
//!
//! The gateway is consumed through the [`PaymentGateway`] trait so services
//! stay testable with a scripted implementation; the production
//! [`HttpPaymentGateway`] talks to the Razorpay-compatible REST surface with
//! key-pair basic auth. All calls are plain blocking-free HTTP and must
//! never run while an inventory row lock is held.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::ServiceError;

/// A remote order as returned by the gateway's order-create endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

/// Authoritative payment detail fetched from the gateway after a client
/// claims a payment happened.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    /// created | authorized | captured | failed
    pub status: String,
    /// upi | card | netbanking | wallet | ...
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub upi: Option<GatewayUpi>,
    #[serde(default)]
    pub card: Option<GatewayCard>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub acquirer_data: Option<GatewayAcquirerData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayUpi {
    #[serde(default)]
    pub vpa: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCard {
    #[serde(default)]
    pub last4: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayAcquirerData {
    #[serde(default)]
    pub upi_transaction_id: Option<String>,
    #[serde(default)]
    pub bank_transaction_id: Option<String>,
}

/// A refund acknowledgement. The terminal outcome arrives via webhook, never
/// from this response.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub amount: i64,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a remote order for `amount` minor units.
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError>;

    /// Fetches authoritative payment details by gateway payment id.
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError>;

    /// Requests a refund of `amount` minor units against a captured payment.
    async fn create_refund(
        &self,
        payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, ServiceError>;
}

/// reqwest-backed gateway client.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    payment_capture: u8,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>, key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {status}: {body}"
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("invalid gateway response: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let response = self
            .client
            .post(self.url("orders"))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody {
                amount,
                currency,
                receipt,
                payment_capture: 1,
            })
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway unreachable: {e}")))?;
        Self::check(response).await
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        let response = self
            .client
            .get(self.url(&format!("payments/{payment_id}")))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway unreachable: {e}")))?;
        Self::check(response).await
    }

    async fn create_refund(
        &self,
        payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, ServiceError> {
        let response = self
            .client
            .post(self.url(&format!("payments/{payment_id}/refund")))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({ "amount": amount, "speed": "optimum" }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway unreachable: {e}")))?;
        Self::check(response).await
    }
}
