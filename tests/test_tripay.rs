//! Tripay client tests against a mock HTTP server.

use demi_masa_api::config::TripayConfig;
use demi_masa_api::retry::RetryPolicy;
use demi_masa_api::services::tripay::{
    GatewayError, PaymentGateway, TransactionRequest, TripayClient,
};
use httpmock::prelude::*;
use uuid::Uuid;

const API_KEY: &str = "DEV-api-key";

fn client(base_url: String) -> TripayClient {
    TripayClient::new(
        TripayConfig {
            base_url,
            merchant_code: "T0001".to_string(),
            api_key: API_KEY.to_string(),
            private_key: "private-key".to_string(),
        },
        RetryPolicy::immediate(3),
    )
    .expect("Failed to build client")
}

fn request() -> TransactionRequest {
    TransactionRequest {
        merchant_ref: Uuid::new_v4(),
        amount: 35_000,
        customer_name: "Ayu".to_string(),
        customer_email: "ayu@example.com".to_string(),
        plan_id: Uuid::new_v4(),
        plan_type: "premium".to_string(),
        plan_name: "Premium 1 month".to_string(),
    }
}

#[tokio::test]
async fn test_create_transaction_unwraps_envelope() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/transaction/create")
                .header("authorization", format!("Bearer {}", API_KEY));
            then.status(200).header("content-type", "application/json").body(
                r#"{"success":true,"message":"","data":{"reference":"DEV-T123","merchant_ref":"x","amount":35000,"expired_time":1893456000,"qr_url":"https://tripay.test/qr/1"}}"#,
            );
        })
        .await;

    let transaction = client(server.base_url())
        .create_transaction(&request())
        .await
        .expect("transaction should be created");

    assert_eq!(transaction.reference, "DEV-T123");
    assert_eq!(transaction.amount, 35_000);
    assert_eq!(transaction.qr_url, "https://tripay.test/qr/1");
    assert_eq!(transaction.expires_at.timestamp(), 1_893_456_000);

    mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/transaction/create");
            then.status(400)
                .header("content-type", "application/json")
                .body(r#"{"success":false,"message":"Invalid signature"}"#);
        })
        .await;

    let result = client(server.base_url()).create_transaction(&request()).await;

    assert!(matches!(result, Err(GatewayError::Rejected(ref m)) if m == "Invalid signature"));
    mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn test_unexpected_body_is_invalid_response() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/transaction/create");
            then.status(502).body("<html>Bad Gateway</html>");
        })
        .await;

    let result = client(server.base_url()).create_transaction(&request()).await;

    assert!(matches!(result, Err(GatewayError::InvalidResponse(_))));
    mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn test_missing_data_is_invalid_response() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/transaction/create");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"success":true,"message":"ok"}"#);
        })
        .await;

    let result = client(server.base_url()).create_transaction(&request()).await;
    assert!(matches!(result, Err(GatewayError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_connect_failure_is_retried_then_surfaced() {
    // Nothing listens on port 1.
    let result = client("http://127.0.0.1:1".to_string())
        .create_transaction(&request())
        .await;

    match result {
        Err(GatewayError::Request(e)) => assert!(e.is_connect()),
        other => panic!("expected a connect error, got {:?}", other),
    }
}
