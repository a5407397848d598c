//! Authentication handlers.
//!
//! This module provides the following endpoints:
//! - `POST /auth/register` - Creates an account and returns a first token pair
//! - `POST /auth/login` - Signs in with email and password
//! - `POST /auth/refresh` - Exchanges the bearer refresh token for a new pair
//! - `POST /auth/logout` - Revokes a refresh token owned by the caller

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::Database;
use crate::error::AppResult;
use crate::middleware::auth::{AuthenticatedUser, BearerToken};
use crate::services::token::TokenManager;
use crate::services::user::{self, LoginRequest, RegisterRequest};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState<D: Database> {
    /// Storage backend
    pub db: D,
    /// Application configuration
    pub config: Config,
}

/// Request body for the logout endpoint.
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    /// The refresh token to revoke
    pub refresh_token: String,
}

/// Generic success body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: bool,
}

/// POST /auth/register
///
/// Returns 201 with `{user, refresh_token, access_token}`.
pub async fn register<D: Database>(
    state: web::Data<AppState<D>>,
    tokens: web::Data<TokenManager>,
    body: web::Json<RegisterRequest>,
) -> AppResult<HttpResponse> {
    let session = user::register(&state.db, &tokens, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(session))
}

/// POST /auth/login
pub async fn login<D: Database>(
    state: web::Data<AppState<D>>,
    tokens: web::Data<TokenManager>,
    body: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let session = user::login(&state.db, &tokens, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

/// POST /auth/refresh
///
/// The refresh token is presented as the bearer credential. On success the
/// presented token is revoked and its successor returned with 201.
pub async fn refresh_token<D: Database>(
    state: web::Data<AppState<D>>,
    tokens: web::Data<TokenManager>,
    bearer: BearerToken,
) -> AppResult<HttpResponse> {
    let pair = tokens.refresh(&state.db, &bearer.0).await?;
    Ok(HttpResponse::Created().json(pair))
}

/// POST /auth/logout
///
/// Requires an access token. The refresh token in the body must belong to
/// the same user.
pub async fn logout<D: Database>(
    state: web::Data<AppState<D>>,
    tokens: web::Data<TokenManager>,
    user: AuthenticatedUser,
    body: web::Json<LogoutRequest>,
) -> AppResult<HttpResponse> {
    tokens
        .logout(&state.db, &body.refresh_token, user.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(StatusResponse { status: true }))
}
