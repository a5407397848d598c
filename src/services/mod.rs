//! Services module - business logic and external service integrations.
//!
//! This module contains:
//! - `token`: Token lifecycle (issue, validate, rotate, revoke)
//! - `user`: Email/password accounts
//! - `coupon`: Coupon quota reservations and their compensation
//! - `payment`: Invoice saga and payment callbacks
//! - `tripay`: Tripay payment gateway client

pub mod coupon;
pub mod payment;
pub mod token;
pub mod tripay;
pub mod user;

// Re-export commonly used types for convenience
pub use coupon::{CouponReservation, SagaMetrics};
pub use payment::{CreateInvoiceRequest, PaymentCallback, PaymentService};
pub use token::{Claims, CredentialError, TokenManager, TokenPair, TokenSettings, TokenType};
pub use tripay::{GatewayError, GatewayTransaction, PaymentGateway, TransactionRequest, TripayClient};
pub use user::{AuthSession, LoginRequest, RegisterRequest};
