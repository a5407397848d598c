//! Tripay payment gateway client.
//!
//! This module provides:
//! - Closed-payment transaction creation (`POST /transaction/create`)
//! - Request signatures: HMAC-SHA256 over merchant code, merchant reference and amount
//! - Callback verification: HMAC-SHA256 over the raw callback body

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::config::TripayConfig;
use crate::retry::{retry, RetryPolicy, Retryable};

type HmacSha256 = Hmac<Sha256>;

/// Payment channel used for every invoice.
pub const PAYMENT_METHOD: &str = "QRIS";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors that can occur while talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway answered with `success: false`
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),

    /// Failed to parse response from the gateway
    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),

    /// Callback signature is missing, not hex, or does not match
    #[error("Invalid callback signature")]
    InvalidSignature,

    /// The private key cannot be used as an HMAC key
    #[error("Invalid private key")]
    InvalidKey,
}

impl Retryable for GatewayError {
    /// Only failures where the request never reached the gateway are safe
    /// to repeat; anything later could create a second transaction.
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Request(e) => e.is_connect(),
            _ => false,
        }
    }
}

/// What the saga asks the gateway to charge.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    /// Becomes the invoice id.
    pub merchant_ref: Uuid,
    pub amount: i32,
    pub customer_name: String,
    pub customer_email: String,
    pub plan_id: Uuid,
    pub plan_type: String,
    pub plan_name: String,
}

/// A transaction created at the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayTransaction {
    pub reference: String,
    pub amount: i32,
    pub qr_url: String,
    pub expires_at: DateTime<Utc>,
}

/// The external payment provider, as seen by the invoice saga.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<GatewayTransaction, GatewayError>;

    /// Checks the `X-Callback-Signature` header against the raw body.
    fn verify_callback(&self, signature: &str, body: &[u8]) -> Result<(), GatewayError>;
}

#[derive(Debug, Serialize)]
struct OrderItem<'a> {
    sku: String,
    #[serde(rename = "type")]
    item_type: &'a str,
    name: &'a str,
    price: i32,
    quantity: i32,
}

#[derive(Debug, Serialize)]
struct CreateTransactionBody<'a> {
    method: &'static str,
    merchant_ref: String,
    amount: i32,
    customer_name: &'a str,
    customer_email: &'a str,
    order_items: Vec<OrderItem<'a>>,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    reference: String,
    amount: i32,
    /// Unix timestamp
    expired_time: i64,
    #[serde(default)]
    qr_url: String,
}

/// Hex HMAC-SHA256 of `merchant_code ‖ merchant_ref ‖ amount`.
pub fn request_signature(
    private_key: &str,
    merchant_code: &str,
    merchant_ref: &str,
    amount: i32,
) -> Result<String, GatewayError> {
    let mut mac = new_mac(private_key)?;
    mac.update(merchant_code.as_bytes());
    mac.update(merchant_ref.as_bytes());
    mac.update(amount.to_string().as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Hex HMAC-SHA256 of a raw callback body.
pub fn callback_signature(private_key: &str, body: &[u8]) -> Result<String, GatewayError> {
    let mut mac = new_mac(private_key)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of `signature` against the body's HMAC.
pub fn verify_callback_signature(
    private_key: &str,
    signature: &str,
    body: &[u8],
) -> Result<(), GatewayError> {
    let expected = hex::decode(signature.trim()).map_err(|_| GatewayError::InvalidSignature)?;
    let mut mac = new_mac(private_key)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| GatewayError::InvalidSignature)
}

fn new_mac(private_key: &str) -> Result<HmacSha256, GatewayError> {
    HmacSha256::new_from_slice(private_key.as_bytes()).map_err(|_| GatewayError::InvalidKey)
}

/// HTTP client for the Tripay API.
#[derive(Debug, Clone)]
pub struct TripayClient {
    client: reqwest::Client,
    config: TripayConfig,
    retry: RetryPolicy,
}

impl TripayClient {
    pub fn new(config: TripayConfig, retry: RetryPolicy) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .user_agent("demi-masa-api")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, config, retry))
    }

    pub fn with_client(client: reqwest::Client, config: TripayConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            config,
            retry,
        }
    }

    async fn send_create(&self, body: &CreateTransactionBody<'_>) -> Result<GatewayTransaction, GatewayError> {
        let response = self
            .client
            .post(format!("{}/transaction/create", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let envelope: Envelope<TransactionData> = serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::InvalidResponse(format!("status {}: {}", status, e))
        })?;

        if !envelope.success {
            return Err(GatewayError::Rejected(envelope.message));
        }

        let data = envelope
            .data
            .ok_or_else(|| GatewayError::InvalidResponse("missing data".to_string()))?;
        let expires_at = DateTime::from_timestamp(data.expired_time, 0).ok_or_else(|| {
            GatewayError::InvalidResponse(format!("invalid expired_time {}", data.expired_time))
        })?;

        Ok(GatewayTransaction {
            reference: data.reference,
            amount: data.amount,
            qr_url: data.qr_url,
            expires_at,
        })
    }
}

#[async_trait]
impl PaymentGateway for TripayClient {
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        let merchant_ref = request.merchant_ref.to_string();
        let body = CreateTransactionBody {
            method: PAYMENT_METHOD,
            signature: request_signature(
                &self.config.private_key,
                &self.config.merchant_code,
                &merchant_ref,
                request.amount,
            )?,
            merchant_ref,
            amount: request.amount,
            customer_name: &request.customer_name,
            customer_email: &request.customer_email,
            order_items: vec![OrderItem {
                sku: request.plan_id.to_string(),
                item_type: &request.plan_type,
                name: &request.plan_name,
                price: request.amount,
                quantity: 1,
            }],
        };

        let transaction = retry(&self.retry, "tripay_create_transaction", || {
            self.send_create(&body)
        })
        .await?;

        tracing::info!(
            merchant_ref = %request.merchant_ref,
            reference = %transaction.reference,
            amount = transaction.amount,
            "created gateway transaction"
        );
        Ok(transaction)
    }

    fn verify_callback(&self, signature: &str, body: &[u8]) -> Result<(), GatewayError> {
        verify_callback_signature(&self.config.private_key, signature, body)
    }
}
