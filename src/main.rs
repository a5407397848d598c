//! demi-masa-api - Main application entry point
//!
//! Serves account, token and (when Tripay is configured) invoice routes
//! against PostgreSQL.

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use demi_masa_api::config::Config;
use demi_masa_api::db::{create_pool, run_migrations};
use demi_masa_api::handlers::{configure_auth, configure_payments, AppState};
use demi_masa_api::middleware::{create_rate_limiter, rate_limiter_config};
use demi_masa_api::services::{PaymentService, TokenManager, TokenSettings, TripayClient};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "demi_masa_api=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    let server_addr = config.server_addr();
    let retry = config.retry_policy();

    let pool = create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    tracing::info!("Database connection pool created");

    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    let tokens = web::Data::new(TokenManager::new(TokenSettings::from_config(&config), retry));

    // Payment routes only exist with gateway credentials
    let payments = match config.tripay.clone() {
        Some(tripay) => {
            let client = TripayClient::new(tripay, retry).expect("Failed to create Tripay client");
            tracing::info!("Tripay payment gateway configured");
            Some(web::Data::new(PaymentService::new(
                pool.clone(),
                Arc::new(client),
                retry,
                config.coupon_discount_percent,
            )))
        }
        None => {
            tracing::warn!("Tripay not configured - invoice routes disabled");
            None
        }
    };

    let limiter_config = rate_limiter_config().expect("Invalid rate limiter configuration");

    let app_state = web::Data::new(AppState {
        db: pool,
        config,
    });

    tracing::info!("Starting server at http://{}", server_addr);

    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(app_state.clone())
            .app_data(tokens.clone())
            // Request logging
            .wrap(Logger::default())
            // Distributed tracing
            .wrap(tracing_actix_web::TracingLogger::default())
            // Rate limiting (Governor doesn't implement Clone)
            .wrap(create_rate_limiter(&limiter_config))
            .configure(configure_auth::<PgPool>);

        if let Some(ref payments) = payments {
            app = app
                .app_data(payments.clone())
                .configure(configure_payments::<PgPool>);
        }

        app
    })
    .bind(&server_addr)?
    .run()
    .await
}
