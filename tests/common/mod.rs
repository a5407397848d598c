//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use demi_masa_api::services::tripay::{
    callback_signature, verify_callback_signature, GatewayError, GatewayTransaction,
    PaymentGateway, TransactionRequest,
};

pub const PRIVATE_KEY: &str = "test-private-key";

/// Gateway double. Succeeds unless failures were scheduled with `fail_next`.
#[derive(Default)]
pub struct FakeGateway {
    failures: Mutex<VecDeque<GatewayError>>,
    requests: Mutex<Vec<TransactionRequest>>,
    created: AtomicU32,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn requests(&self) -> Vec<TransactionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayTransaction {
            reference: format!("DEV-T{:05}", n),
            amount: request.amount,
            qr_url: format!("https://tripay.test/qr/{}", request.merchant_ref),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    fn verify_callback(&self, signature: &str, body: &[u8]) -> Result<(), GatewayError> {
        verify_callback_signature(PRIVATE_KEY, signature, body)
    }
}

/// A callback body and its valid signature.
pub fn signed_callback(reference: &str, merchant_ref: &str, amount: i32, status: &str) -> (String, Vec<u8>) {
    let body = serde_json::json!({
        "reference": reference,
        "merchant_ref": merchant_ref,
        "payment_method": "QRIS",
        "total_amount": amount,
        "status": status,
    })
    .to_string()
    .into_bytes();
    let signature = callback_signature(PRIVATE_KEY, &body).unwrap();
    (signature, body)
}
