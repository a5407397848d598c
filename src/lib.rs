//! demi-masa-api - accounts, credentials and subscription payments
//!
//! This crate provides email/password accounts with rotating refresh
//! tokens, and a coupon-aware invoice flow on top of the Tripay gateway.
//!
//! # Modules
//!
//! - [`config`] - Application configuration from environment variables
//! - [`db`] - Pool, migrations, storage traits and the transaction runner
//! - [`retry`] - Retry policy for transient failures
//! - [`error`] - Unified error handling
//! - [`models`] - Database rows (User, RefreshToken, Coupon, Invoice, ...)
//! - [`services`] - Token lifecycle, accounts, coupon saga, payments, Tripay
//! - [`handlers`] - HTTP route handlers
//! - [`middleware`] - Bearer extractors and rate limiting
//!
//! # Quick Start
//!
//! ```ignore
//! use demi_masa_api::{AppState, Config, MemoryDb, TokenManager, TokenSettings};
//! use demi_masa_api::handlers::configure_auth;
//!
//! let config = Config::from_env()?;
//! let tokens = TokenManager::new(TokenSettings::from_config(&config), config.retry_policy());
//! let app = App::new()
//!     .app_data(web::Data::new(AppState { db: MemoryDb::new(), config }))
//!     .app_data(web::Data::new(tokens))
//!     .configure(configure_auth::<MemoryDb>);
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod retry;
pub mod services;

// Re-export commonly used types at the crate root
pub use config::{Config, ConfigError, TripayConfig};
pub use db::{create_pool, run_migrations, Database, FaultPoint, MemoryDb};
pub use error::{AppError, AppResult};
pub use handlers::auth::AppState;
pub use models::{Coupon, Invoice, Payment, Plan, RefreshToken, Subscription, User};
pub use retry::{RetryPolicy, Retryable};
pub use services::{
    Claims, CredentialError, GatewayError, PaymentService, TokenManager, TokenPair,
    TokenSettings, TokenType, TripayClient,
};
