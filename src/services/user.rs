//! Email/password accounts.
//!
//! Registration and login each end in a new session: the user write and the
//! refresh token row commit in one transaction, and the access token is
//! signed after the commit.

use std::sync::OnceLock;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{run_in_transaction, CredentialTx, Database, UserStore, UserTx};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::retry::retry;
use crate::services::token::TokenManager;

pub const MIN_USERNAME_LEN: usize = 2;
pub const MIN_PASSWORD_LEN: usize = 8;

const INVALID_LOGIN: &str = "Invalid email or password";
const EMAIL_TAKEN: &str = "Email is already registered";

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// A signed-in user and their first token pair.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: User,
    pub refresh_token: String,
    pub access_token: String,
}

/// Hashes a password using Argon2id with secure defaults.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verifies a password against a stored PHC string.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// A hash no password matches, verified against when the email is unknown
/// so that both login failures cost one Argon2 verification.
fn dummy_hash() -> &'static str {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();
    DUMMY_HASH.get_or_init(|| {
        let secret = Uuid::new_v4().to_string();
        hash_password(&secret).unwrap_or_default()
    })
}

/// Shape check only: one `@` with a non-empty local part and a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(request: &RegisterRequest) -> AppResult<()> {
    if !is_valid_email(request.email.trim()) {
        return Err(AppError::BadRequest("email is invalid".to_string()));
    }
    if request.username.trim().chars().count() < MIN_USERNAME_LEN {
        return Err(AppError::BadRequest(format!(
            "username must be at least {} characters",
            MIN_USERNAME_LEN
        )));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Creates an account and signs the user in.
pub async fn register<D: Database>(
    db: &D,
    tokens: &TokenManager,
    request: RegisterRequest,
) -> AppResult<AuthSession> {
    validate_registration(&request)?;

    let email = normalize_email(&request.email);
    let existing = retry(tokens.retry_policy(), "find_user_by_email", || {
        db.find_user_by_email(&email)
    })
    .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(EMAIL_TAKEN.to_string()));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        username: request.username.trim().to_string(),
        password_hash,
    };

    let manager = tokens.clone();
    let (user, issued) = run_in_transaction(db, tokens.retry_policy(), move |tx| {
        let (manager, new_user) = (manager.clone(), new_user.clone());
        Box::pin(async move {
            let user = tx
                .insert_user(&new_user)
                .await
                .map_err(|e| AppError::conflict_on_unique(e, EMAIL_TAKEN))?;
            let issued = manager.issue_refresh(user.id)?;
            tx.insert_refresh_token(&issued.record()).await?;
            Ok::<_, AppError>((user, issued))
        })
    })
    .await?;

    tracing::info!(user_id = %user.id, "registered user");

    Ok(AuthSession {
        access_token: tokens.issue_access(user.id)?,
        refresh_token: issued.token,
        user,
    })
}

/// Checks credentials and opens a new session.
///
/// An unknown email and a wrong password fail the same way.
pub async fn login<D: Database>(
    db: &D,
    tokens: &TokenManager,
    request: LoginRequest,
) -> AppResult<AuthSession> {
    let email = normalize_email(&request.email);
    let found = retry(tokens.retry_policy(), "find_user_by_email", || {
        db.find_user_by_email(&email)
    })
    .await?;

    let Some(mut user) = found else {
        verify_password(&request.password, dummy_hash());
        return Err(AppError::Unauthorized(INVALID_LOGIN.to_string()));
    };

    if !verify_password(&request.password, &user.password_hash) {
        tracing::warn!(user_id = %user.id, "failed login attempt");
        return Err(AppError::Unauthorized(INVALID_LOGIN.to_string()));
    }

    let user_id = user.id;
    let manager = tokens.clone();
    let issued = run_in_transaction(db, tokens.retry_policy(), move |tx| {
        let manager = manager.clone();
        Box::pin(async move {
            if tx.record_login(user_id).await? != 1 {
                return Err(AppError::Unauthorized(INVALID_LOGIN.to_string()));
            }
            let issued = manager.issue_refresh(user_id)?;
            tx.insert_refresh_token(&issued.record()).await?;
            Ok::<_, AppError>(issued)
        })
    })
    .await?;

    user.last_login_at = Some(chrono::Utc::now());
    tracing::info!(%user_id, "user logged in");

    Ok(AuthSession {
        access_token: tokens.issue_access(user_id)?,
        refresh_token: issued.token,
        user,
    })
}
