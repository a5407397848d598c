//! Bearer-token extractors.
//!
//! This module provides:
//! - `BearerToken`, the raw token from the `Authorization: Bearer` header
//! - `AuthenticatedUser`, which also validates it as an access token

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::services::token::{CredentialError, TokenManager, TokenType};

/// Represents an authenticated user extracted from a valid access token.
///
/// Refresh tokens are rejected here even when their signature is valid.
///
/// # Example
///
/// ```ignore
/// use crate::middleware::auth::AuthenticatedUser;
///
/// async fn protected_route(user: AuthenticatedUser) -> impl Responder {
///     format!("Hello, user {}", user.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// The UUID of the authenticated user
    pub user_id: Uuid,
}

/// The token from an `Authorization: Bearer <token>` header, not yet validated.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Error type for authentication failures.
#[derive(Debug)]
pub enum AuthError {
    /// No Authorization header present
    MissingToken,
    /// Invalid Authorization header format
    InvalidHeader,
    /// Token validation failed
    InvalidToken,
    /// Token was valid once but has expired
    ExpiredToken,
    /// Token manager not registered as app data
    MissingTokenManager,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidHeader => write!(f, "Invalid authorization header format"),
            AuthError::InvalidToken => write!(f, "Invalid token"),
            AuthError::ExpiredToken => write!(f, "Token has expired"),
            AuthError::MissingTokenManager => write!(f, "Internal server error"),
        }
    }
}

impl actix_web::ResponseError for AuthError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AuthError::MissingToken
            | AuthError::InvalidHeader
            | AuthError::InvalidToken
            | AuthError::ExpiredToken => actix_web::http::StatusCode::UNAUTHORIZED,
            AuthError::MissingTokenManager => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        let body = serde_json::json!({
            "error": self.to_string()
        });
        actix_web::HttpResponse::build(self.status_code()).json(body)
    }
}

fn bearer(req: &HttpRequest) -> Result<&str, AuthError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader)?;

    match auth_header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::InvalidHeader),
    }
}

impl FromRequest for BearerToken {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(bearer(req).map(|token| BearerToken(token.to_string())))
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = match bearer(req) {
            Ok(token) => token,
            Err(e) => return ready(Err(e)),
        };

        let tokens = match req.app_data::<web::Data<TokenManager>>() {
            Some(tokens) => tokens,
            None => return ready(Err(AuthError::MissingTokenManager)),
        };

        let result = match tokens.validate(token, TokenType::Access) {
            Ok(claims) => Ok(AuthenticatedUser {
                user_id: claims.sub,
            }),
            Err(CredentialError::Expired) => Err(AuthError::ExpiredToken),
            Err(_) => Err(AuthError::InvalidToken),
        };
        ready(result)
    }
}
