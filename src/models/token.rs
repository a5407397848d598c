//! Refresh token model.
//!
//! Only refresh credentials have server-side state. Access credentials are
//! never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A refresh token row. The primary key is the JTI embedded in the signed
/// token, so the raw token itself is never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
    /// JTI of the signed refresh token (UUID v4)
    pub id: Uuid,

    /// Reference to the user who owns this token
    pub user_id: Uuid,

    /// Set once, when the token is rotated or logged out. Never cleared.
    pub revoked: bool,

    /// Timestamp when this token expires
    pub expires_at: DateTime<Utc>,

    /// Timestamp when this token was created
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Checks if the token has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Values for inserting a refresh token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl From<NewRefreshToken> for RefreshToken {
    fn from(token: NewRefreshToken) -> Self {
        Self {
            id: token.id,
            user_id: token.user_id,
            revoked: false,
            expires_at: token.expires_at,
            created_at: Utc::now(),
        }
    }
}
