//! HTTP handlers for the demi-masa API.
//!
//! This module contains all the route handlers:
//! - `auth` - Registration, login, token refresh and logout
//! - `health` - Health check endpoint
//! - `payment` - Invoices and gateway callbacks

pub mod auth;
pub mod health;
pub mod payment;

use actix_web::web;

use crate::db::Database;

// Re-export commonly used types
pub use auth::{login, logout, refresh_token, register, AppState, LogoutRequest, StatusResponse};
pub use health::{health_check, HealthResponse};
pub use payment::{
    active_invoice, create_invoice, list_payments, payment_callback, CALLBACK_SIGNATURE_HEADER,
};

/// Health and authentication routes. Needs `AppState<D>` and
/// `TokenManager` app data.
pub fn configure_auth<D: Database>(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/auth")
            .route("/register", web::post().to(register::<D>))
            .route("/login", web::post().to(login::<D>))
            .route("/refresh", web::post().to(refresh_token::<D>))
            .route("/logout", web::post().to(logout::<D>)),
    );
}

/// Invoice and payment routes. Additionally needs `PaymentService<D>` app
/// data.
pub fn configure_payments<D: Database>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/invoices")
            .route("", web::post().to(create_invoice::<D>))
            .route("/active", web::get().to(active_invoice::<D>)),
    )
    .route("/payments", web::get().to(list_payments::<D>))
    .route("/payments/callback", web::post().to(payment_callback::<D>));
}
