//! Token lifecycle: issuing, validating, rotating and revoking credentials.
//!
//! Two kinds of signed JWT are issued for one issuer:
//! - access tokens, short-lived and stateless;
//! - refresh tokens, long-lived, each backed by a `refresh_tokens` row keyed
//!   by the token's `jti`.
//!
//! Every token carries a `type` claim that is checked on validation, so one
//! kind is never accepted in place of the other. Rotation revokes the
//! presented refresh token and inserts its successor in one transaction; the
//! successor keeps the predecessor's remaining lifetime instead of a fresh one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{run_in_transaction, CredentialStore, CredentialTx, TransactionSource};
use crate::models::NewRefreshToken;
use crate::retry::{retry, RetryPolicy, Retryable};

/// The only algorithm tokens are signed or accepted with.
pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Failures of the credential lifecycle.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Bad signature, wrong algorithm, wrong issuer, wrong `type`, or a
    /// missing or invalid claim.
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token has expired")]
    Expired,

    /// The refresh token is unknown or already revoked. The two cases are
    /// deliberately reported the same way.
    #[error("token is revoked or unknown")]
    Revoked,

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Retryable for CredentialError {
    fn is_retryable(&self) -> bool {
        match self {
            CredentialError::Database(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims shared by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Subject - the user ID
    pub sub: Uuid,
    pub iss: String,
    /// Issued at time as Unix timestamp
    pub iat: i64,
    /// Expiration time as Unix timestamp
    pub exp: i64,
    /// Row key of a refresh token. Absent on access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
}

/// A freshly signed refresh token and the row that must be stored for it.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub jti: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl IssuedRefreshToken {
    pub fn record(&self) -> NewRefreshToken {
        NewRefreshToken {
            id: self.jti,
            user_id: self.user_id,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub refresh_token: String,
    pub access_token: String,
}

/// Signing material and lifetimes for a [`TokenManager`].
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl TokenSettings {
    /// Settings with the default lifetimes: 5 minutes and 30 days.
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            access_ttl: Duration::minutes(5),
            refresh_ttl: Duration::days(30),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            secret: config.secret_key.clone(),
            issuer: config.origin_url.clone(),
            access_ttl: Duration::seconds(config.access_token_expiry_secs),
            refresh_ttl: Duration::days(config.refresh_token_expiry_days),
        }
    }
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

/// Issues and checks tokens. Cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
    keys: Arc<Keys>,
    retry: RetryPolicy,
}

impl TokenManager {
    pub fn new(settings: TokenSettings, retry: RetryPolicy) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[settings.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        Self {
            keys: Arc::new(Keys {
                encoding: EncodingKey::from_secret(settings.secret.as_bytes()),
                decoding: DecodingKey::from_secret(settings.secret.as_bytes()),
                validation,
                issuer: settings.issuer,
                access_ttl: settings.access_ttl,
                refresh_ttl: settings.refresh_ttl,
            }),
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn sign(&self, claims: &Claims) -> Result<String, CredentialError> {
        encode(&Header::new(ALGORITHM), claims, &self.keys.encoding)
            .map_err(CredentialError::Signing)
    }

    /// Signs a short-lived access token for `user_id`.
    pub fn issue_access(&self, user_id: Uuid) -> Result<String, CredentialError> {
        let now = Utc::now();
        self.sign(&Claims {
            token_type: TokenType::Access,
            sub: user_id,
            iss: self.keys.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.keys.access_ttl).timestamp(),
            jti: None,
        })
    }

    /// Signs a refresh token with the full configured lifetime.
    ///
    /// Nothing is stored; the caller inserts [`IssuedRefreshToken::record`]
    /// in the same transaction as its other writes.
    pub fn issue_refresh(&self, user_id: Uuid) -> Result<IssuedRefreshToken, CredentialError> {
        self.issue_refresh_with_ttl(user_id, self.keys.refresh_ttl)
    }

    /// Signs a refresh token that lives for `ttl` with a fresh `jti`.
    pub fn issue_refresh_with_ttl(
        &self,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<IssuedRefreshToken, CredentialError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let jti = Uuid::new_v4();
        let token = self.sign(&Claims {
            token_type: TokenType::Refresh,
            sub: user_id,
            iss: self.keys.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Some(jti),
        })?;

        Ok(IssuedRefreshToken {
            token,
            jti,
            user_id,
            expires_at,
        })
    }

    /// Verifies signature, algorithm, issuer, expiry and the `type` claim.
    pub fn validate(&self, token: &str, expected: TokenType) -> Result<Claims, CredentialError> {
        let data = decode::<Claims>(token, &self.keys.decoding, &self.keys.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                _ => CredentialError::Malformed(e.to_string()),
            },
        )?;

        let claims = data.claims;
        if claims.token_type != expected {
            return Err(CredentialError::Malformed(format!(
                "expected {:?} token, got {:?}",
                expected, claims.token_type
            )));
        }
        if expected == TokenType::Refresh && claims.jti.is_none() {
            return Err(CredentialError::Malformed("missing jti".to_string()));
        }

        Ok(claims)
    }

    /// Exchanges the refresh token `old_jti` for a new pair.
    ///
    /// The revoke of the old row and the insert of the new one commit
    /// together or not at all. Only one of several concurrent rotations of
    /// the same token can observe the revoke; the others get
    /// [`CredentialError::Revoked`].
    pub async fn rotate<D>(
        &self,
        db: &D,
        old_jti: Uuid,
        user_id: Uuid,
        old_expires_at: DateTime<Utc>,
    ) -> Result<TokenPair, CredentialError>
    where
        D: TransactionSource,
    {
        let manager = self.clone();
        let issued = run_in_transaction(db, &self.retry, move |tx| {
            let manager = manager.clone();
            Box::pin(async move {
                if tx.revoke_refresh_token(old_jti, user_id).await? != 1 {
                    return Err(CredentialError::Revoked);
                }

                let remaining = old_expires_at - Utc::now();
                if remaining <= Duration::zero() {
                    return Err(CredentialError::Expired);
                }

                let issued = manager.issue_refresh_with_ttl(user_id, remaining)?;
                tx.insert_refresh_token(&issued.record()).await?;
                Ok::<_, CredentialError>(issued)
            })
        })
        .await?;

        tracing::info!(%user_id, old_jti = %old_jti, new_jti = %issued.jti, "rotated refresh token");

        Ok(TokenPair {
            refresh_token: issued.token,
            access_token: self.issue_access(user_id)?,
        })
    }

    /// Marks a refresh token revoked. Unknown and already revoked tokens are
    /// both [`CredentialError::Revoked`].
    pub async fn revoke<D>(&self, db: &D, jti: Uuid, user_id: Uuid) -> Result<(), CredentialError>
    where
        D: CredentialStore,
    {
        let affected = retry(&self.retry, "revoke_refresh_token", || {
            db.revoke_refresh_token(jti, user_id)
        })
        .await?;

        if affected != 1 {
            return Err(CredentialError::Revoked);
        }
        Ok(())
    }

    /// Full refresh flow for a presented refresh token string.
    pub async fn refresh<D>(&self, db: &D, token: &str) -> Result<TokenPair, CredentialError>
    where
        D: TransactionSource + CredentialStore,
    {
        let claims = self.validate(token, TokenType::Refresh)?;
        let jti = claims
            .jti
            .ok_or_else(|| CredentialError::Malformed("missing jti".to_string()))?;

        let row = retry(&self.retry, "find_refresh_token", || {
            db.find_refresh_token(jti, claims.sub)
        })
        .await?
        .ok_or(CredentialError::Revoked)?;

        if row.revoked {
            tracing::warn!(user_id = %claims.sub, %jti, "revoked refresh token presented");
            return Err(CredentialError::Revoked);
        }
        if row.is_expired() {
            return Err(CredentialError::Expired);
        }

        self.rotate(db, jti, claims.sub, row.expires_at).await
    }

    /// Revokes `token` on behalf of `user_id`, who must own it.
    pub async fn logout<D>(&self, db: &D, token: &str, user_id: Uuid) -> Result<(), CredentialError>
    where
        D: CredentialStore,
    {
        let claims = self.validate(token, TokenType::Refresh)?;
        if claims.sub != user_id {
            return Err(CredentialError::Revoked);
        }
        let jti = claims
            .jti
            .ok_or_else(|| CredentialError::Malformed("missing jti".to_string()))?;

        self.revoke(db, jti, user_id).await?;
        tracing::info!(%user_id, %jti, "refresh token revoked");
        Ok(())
    }
}
