//! User model for email/password accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Represents a registered user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique identifier for the user (UUID v4)
    pub id: Uuid,

    /// Login email, unique across users
    pub email: String,

    /// Display name
    pub username: String,

    /// Argon2id PHC string. Never serialized into responses.
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// Timestamp of the last successful login
    pub last_login_at: Option<DateTime<Utc>>,

    /// Timestamp when the user record was created
    pub created_at: DateTime<Utc>,

    /// Timestamp when the user record was last updated
    pub updated_at: DateTime<Utc>,
}

/// Values for inserting a user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

impl From<NewUser> for User {
    fn from(user: NewUser) -> Self {
        let now = Utc::now();
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            password_hash: user.password_hash,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_serialization_hides_password_hash() {
        let user: User = NewUser {
            id: Uuid::new_v4(),
            email: "octo@example.com".to_string(),
            username: "octo".to_string(),
            password_hash: "$argon2id$secret".to_string(),
        }
        .into();

        let json = serde_json::to_string(&user).expect("Failed to serialize user");
        assert!(json.contains("\"email\":\"octo@example.com\""));
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2id"));
    }
}
