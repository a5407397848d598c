use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::services::payment::DEFAULT_DISCOUNT_PERCENT;

/// Default Tripay endpoint; production deployments point this at `https://tripay.co.id/api`.
pub const DEFAULT_TRIPAY_BASE_URL: &str = "https://tripay.co.id/api-sandbox";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Symmetric key that signs both token kinds.
    pub secret_key: String,
    /// Public origin of this service. Used as the token issuer and to build
    /// `Location` headers.
    pub origin_url: String,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_days: i64,
    pub db_retry_attempts: u32,
    pub db_retry_backoff_ms: u64,
    /// Percentage taken off the plan price when a coupon is reserved.
    pub coupon_discount_percent: u8,
    pub host: String,
    pub port: u16,
    pub tripay: Option<TripayConfig>,
}

/// Payment gateway credentials. Payment routes are disabled without them.
#[derive(Debug, Clone)]
pub struct TripayConfig {
    pub base_url: String,
    pub merchant_code: String,
    pub api_key: String,
    pub private_key: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

fn required(var: &str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingVar(var.to_string()))
}

fn parsed<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(var)
        .ok()
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Skip loading .env in test mode to allow tests to control env vars
        if env::var("DEMI_MASA_TEST_MODE").is_err() {
            dotenvy::dotenv().ok();
        }

        let database_url = required("DATABASE_URL")?;
        let secret_key = required("SECRET_KEY")?;
        let origin_url = required("ORIGIN_URL")?
            .trim_end_matches('/')
            .to_string();

        let access_token_expiry_secs = parsed("ACCESS_TOKEN_EXPIRY_SECS", 300i64)?; // 5 minutes
        let refresh_token_expiry_days = parsed("REFRESH_TOKEN_EXPIRY_DAYS", 30i64)?;
        if access_token_expiry_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                var: "ACCESS_TOKEN_EXPIRY_SECS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if refresh_token_expiry_days <= 0 {
            return Err(ConfigError::InvalidValue {
                var: "REFRESH_TOKEN_EXPIRY_DAYS".to_string(),
                message: "must be positive".to_string(),
            });
        }

        let db_retry_attempts = parsed("DB_RETRY_ATTEMPTS", 3u32)?;
        if db_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                var: "DB_RETRY_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let db_retry_backoff_ms = parsed("DB_RETRY_BACKOFF_MS", 25u64)?;

        let coupon_discount_percent = parsed("COUPON_DISCOUNT_PERCENT", DEFAULT_DISCOUNT_PERCENT)?;
        if coupon_discount_percent > 100 {
            return Err(ConfigError::InvalidValue {
                var: "COUPON_DISCOUNT_PERCENT".to_string(),
                message: "must be between 0 and 100".to_string(),
            });
        }

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parsed("PORT", 8080u16)?;

        // Gateway settings (optional for local development)
        let tripay = match (
            env::var("TRIPAY_MERCHANT_CODE").ok(),
            env::var("TRIPAY_API_KEY").ok(),
            env::var("TRIPAY_PRIVATE_KEY").ok(),
        ) {
            (Some(merchant_code), Some(api_key), Some(private_key)) => Some(TripayConfig {
                base_url: env::var("TRIPAY_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_TRIPAY_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                merchant_code,
                api_key,
                private_key,
            }),
            _ => None,
        };

        Ok(Config {
            database_url,
            secret_key,
            origin_url,
            access_token_expiry_secs,
            refresh_token_expiry_days,
            db_retry_attempts,
            db_retry_backoff_ms,
            coupon_discount_percent,
            host,
            port,
            tripay,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.db_retry_attempts,
            Duration::from_millis(self.db_retry_backoff_ms),
        )
    }
}
