//! Integration tests for registration and login.

use demi_masa_api::db::{FaultPoint, MemoryDb};
use demi_masa_api::error::AppError;
use demi_masa_api::retry::RetryPolicy;
use demi_masa_api::services::token::{TokenManager, TokenSettings, TokenType};
use demi_masa_api::services::user::{login, register, LoginRequest, RegisterRequest};

fn manager() -> TokenManager {
    TokenManager::new(
        TokenSettings::new("accounts_secret", "https://api.demi-masa.test"),
        RetryPolicy::immediate(3),
    )
}

fn registration(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        username: "ayu".to_string(),
        password: "sup3rsecret".to_string(),
    }
}

#[tokio::test]
async fn test_register_issues_session() {
    let db = MemoryDb::new();
    let tokens = manager();

    let session = register(&db, &tokens, registration("ayu@example.com"))
        .await
        .expect("registration should succeed");

    let access = tokens
        .validate(&session.access_token, TokenType::Access)
        .unwrap();
    assert_eq!(access.sub, session.user.id);

    let refresh = tokens
        .validate(&session.refresh_token, TokenType::Refresh)
        .unwrap();
    let row = db.refresh_token(refresh.jti.unwrap()).await.unwrap();
    assert_eq!(row.user_id, session.user.id);
    assert!(session.user.password_hash.starts_with("$argon2id$"));
}

#[tokio::test]
async fn test_register_is_atomic() {
    let db = MemoryDb::new();
    let tokens = manager();
    db.inject(FaultPoint::RefreshTokenInsert, sqlx::Error::RowNotFound);

    let result = register(&db, &tokens, registration("ayu@example.com")).await;

    assert!(matches!(result, Err(AppError::Database(_))));
    assert_eq!(db.user_count().await, 0);
    assert_eq!(db.refresh_token_count().await, 0);

    // Nothing was left behind, so the email is still free.
    assert!(register(&db, &tokens, registration("ayu@example.com"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_register_conflict() {
    let db = MemoryDb::new();
    let tokens = manager();
    db.seed_user("ayu@example.com").await;

    let result = register(&db, &tokens, registration(" AYU@example.com ")).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(db.user_count().await, 1);
}

#[tokio::test]
async fn test_login_records_last_login() {
    let db = MemoryDb::new();
    let tokens = manager();
    let registered = register(&db, &tokens, registration("ayu@example.com"))
        .await
        .unwrap();
    assert!(registered.user.last_login_at.is_none());

    let session = login(
        &db,
        &tokens,
        LoginRequest {
            email: "Ayu@Example.com".to_string(),
            password: "sup3rsecret".to_string(),
        },
    )
    .await
    .expect("login should succeed");

    assert_eq!(session.user.id, registered.user.id);
    let stored = db.user(registered.user.id).await.unwrap();
    assert!(stored.last_login_at.is_some());
    assert_eq!(db.refresh_token_count().await, 2);
}

#[tokio::test]
async fn test_login_failure_leaves_no_session() {
    let db = MemoryDb::new();
    let tokens = manager();
    let registered = register(&db, &tokens, registration("ayu@example.com"))
        .await
        .unwrap();
    db.inject(FaultPoint::RefreshTokenInsert, sqlx::Error::RowNotFound);

    let result = login(
        &db,
        &tokens,
        LoginRequest {
            email: "ayu@example.com".to_string(),
            password: "sup3rsecret".to_string(),
        },
    )
    .await;

    assert!(matches!(result, Err(AppError::Database(_))));
    assert_eq!(db.refresh_token_count().await, 1);
    // The login timestamp rolled back with the refresh row.
    let stored = db.user(registered.user.id).await.unwrap();
    assert!(stored.last_login_at.is_none());
}

#[tokio::test]
async fn test_unknown_email_is_unauthorized() {
    let db = MemoryDb::new();
    let tokens = manager();

    let result = login(
        &db,
        &tokens,
        LoginRequest {
            email: "nobody@example.com".to_string(),
            password: "sup3rsecret".to_string(),
        },
    )
    .await;

    assert!(matches!(result, Err(AppError::Unauthorized(_))));
    assert_eq!(db.refresh_token_count().await, 0);
}
