//! Unified error handling for the demi-masa API.
//!
//! This module provides a centralized error type (`AppError`) that handles
//! all errors throughout the application and maps them to appropriate HTTP responses.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::retry::Retryable;
use crate::services::token::CredentialError;
use crate::services::tripay::GatewayError;

/// Unified application error type.
///
/// All errors in the application are converted to this type, which implements
/// `actix_web::ResponseError` for automatic HTTP response generation.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database errors from SQLx
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Token validation, rotation and revocation failures
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Payment gateway errors
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Unauthorized access errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request errors
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden errors (e.g. a callback with a bad signature)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g. an email that is already registered)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Maps a unique violation to `Conflict` and keeps every other error as is.
    pub fn conflict_on_unique(err: sqlx::Error, message: &str) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => AppError::Conflict(message.to_string()),
            _ => AppError::Database(err),
        }
    }
}

impl Retryable for AppError {
    fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => e.is_retryable(),
            AppError::Credential(e) => e.is_retryable(),
            AppError::Gateway(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Credential(CredentialError::Signing(_))
            | AppError::Credential(CredentialError::Database(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Credential(_) => StatusCode::UNAUTHORIZED,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_message = match self {
            // For database and internal errors, don't expose internal details
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Credential(CredentialError::Signing(_))
            | AppError::Credential(CredentialError::Database(_)) => {
                "Internal server error".to_string()
            }
            AppError::Credential(CredentialError::Expired) => "Token has expired".to_string(),
            AppError::Credential(_) => "Invalid token".to_string(),
            AppError::Gateway(_) => "Payment gateway unavailable".to_string(),
            // For these errors, expose the message
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Forbidden(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Conflict(msg) => msg.clone(),
        };

        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": error_message
        });

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
