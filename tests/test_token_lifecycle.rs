//! Integration tests for refresh token rotation, revocation and logout.
//!
//! These run against the in-memory backend so that transaction failures can
//! be injected at specific statements.

use chrono::{Duration, Utc};
use demi_masa_api::db::{run_in_transaction, CredentialTx, FaultPoint, MemoryDb};
use demi_masa_api::retry::RetryPolicy;
use demi_masa_api::services::token::{
    CredentialError, IssuedRefreshToken, TokenManager, TokenSettings, TokenType,
};
use uuid::Uuid;

const SECRET: &str = "integration_secret";
const ISSUER: &str = "https://api.demi-masa.test";

fn manager() -> TokenManager {
    TokenManager::new(TokenSettings::new(SECRET, ISSUER), RetryPolicy::immediate(3))
}

/// Issues a refresh token with `ttl` and stores its row.
async fn stored_refresh(
    db: &MemoryDb,
    tokens: &TokenManager,
    user_id: Uuid,
    ttl: Duration,
) -> IssuedRefreshToken {
    let issued = tokens
        .issue_refresh_with_ttl(user_id, ttl)
        .expect("Failed to issue refresh token");
    let record = issued.record();
    run_in_transaction(db, &RetryPolicy::immediate(1), move |tx| {
        let record = record.clone();
        Box::pin(async move {
            tx.insert_refresh_token(&record).await?;
            Ok::<_, sqlx::Error>(())
        })
    })
    .await
    .expect("Failed to store refresh token");
    issued
}

fn jti_of(tokens: &TokenManager, token: &str) -> Uuid {
    tokens
        .validate(token, TokenType::Refresh)
        .expect("successor should validate")
        .jti
        .expect("refresh tokens carry a jti")
}

// ============================================================================
// Rotation
// ============================================================================

#[tokio::test]
async fn test_rotation_invalidates_predecessor() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let original = stored_refresh(&db, &tokens, user_id, Duration::days(30)).await;

    let pair = tokens
        .refresh(&db, &original.token)
        .await
        .expect("first refresh should succeed");

    let access = tokens
        .validate(&pair.access_token, TokenType::Access)
        .expect("access token should validate");
    assert_eq!(access.sub, user_id);

    let old_row = db.refresh_token(original.jti).await.unwrap();
    assert!(old_row.revoked);

    let new_jti = jti_of(&tokens, &pair.refresh_token);
    let new_row = db.refresh_token(new_jti).await.expect("successor row stored");
    assert!(!new_row.revoked);
    assert_eq!(new_row.user_id, user_id);

    // Replaying the predecessor fails, the successor still works.
    assert!(matches!(
        tokens.refresh(&db, &original.token).await,
        Err(CredentialError::Revoked)
    ));
    assert!(tokens.refresh(&db, &pair.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_successor_keeps_remaining_lifetime() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let original = stored_refresh(&db, &tokens, user_id, Duration::days(10)).await;

    let pair = tokens.refresh(&db, &original.token).await.unwrap();
    let claims = tokens
        .validate(&pair.refresh_token, TokenType::Refresh)
        .unwrap();

    // Within a couple of seconds of the predecessor's expiry, never a fresh 30 days.
    let drift = (claims.exp - original.expires_at.timestamp()).abs();
    assert!(drift <= 2, "successor expiry drifted by {}s", drift);

    let new_row = db.refresh_token(claims.jti.unwrap()).await.unwrap();
    assert!(new_row.expires_at <= original.expires_at + Duration::seconds(1));
    assert!(new_row.expires_at < Utc::now() + Duration::days(11));
}

#[tokio::test]
async fn test_concurrent_rotation_has_one_winner() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let original = stored_refresh(&db, &tokens, user_id, Duration::days(30)).await;

    let (a, b) = tokio::join!(
        tokens.refresh(&db, &original.token),
        tokens.refresh(&db, &original.token)
    );

    let results = [a, b];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one rotation may succeed");
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CredentialError::Revoked))));

    // The original plus exactly one successor.
    assert_eq!(db.refresh_token_count().await, 2);
}

#[tokio::test]
async fn test_failed_insert_rolls_back_revoke() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let original = stored_refresh(&db, &tokens, user_id, Duration::days(30)).await;

    // Not transient, so the executor gives up after one attempt.
    db.inject(FaultPoint::RefreshTokenInsert, sqlx::Error::RowNotFound);

    let result = tokens.refresh(&db, &original.token).await;
    assert!(matches!(result, Err(CredentialError::Database(_))));

    let row = db.refresh_token(original.jti).await.unwrap();
    assert!(!row.revoked, "revoke must not survive the failed insert");
    assert_eq!(db.refresh_token_count().await, 1);

    // The untouched token can still be rotated.
    assert!(tokens.refresh(&db, &original.token).await.is_ok());
}

#[tokio::test]
async fn test_transient_commit_failure_is_retried() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let original = stored_refresh(&db, &tokens, user_id, Duration::days(30)).await;

    db.inject(FaultPoint::Commit, sqlx::Error::PoolTimedOut);

    let pair = tokens
        .refresh(&db, &original.token)
        .await
        .expect("retry should hide the transient failure");
    assert_eq!(db.pending_faults(FaultPoint::Commit), 0);

    // The failed attempt left nothing behind.
    assert_eq!(db.refresh_token_count().await, 2);
    assert!(db.refresh_token(original.jti).await.unwrap().revoked);
    let new_jti = jti_of(&tokens, &pair.refresh_token);
    assert!(!db.refresh_token(new_jti).await.unwrap().revoked);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let original = stored_refresh(&db, &tokens, user_id, Duration::days(30)).await;

    for _ in 0..3 {
        db.inject(FaultPoint::Begin, sqlx::Error::PoolTimedOut);
    }

    let result = tokens.refresh(&db, &original.token).await;
    assert!(matches!(
        result,
        Err(CredentialError::Database(sqlx::Error::PoolTimedOut))
    ));
    assert!(!db.refresh_token(original.jti).await.unwrap().revoked);
}

#[tokio::test]
async fn test_unknown_refresh_token_is_revoked() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;

    // Signed correctly but never stored.
    let issued = tokens.issue_refresh(user_id).unwrap();
    assert!(matches!(
        tokens.refresh(&db, &issued.token).await,
        Err(CredentialError::Revoked)
    ));
}

#[tokio::test]
async fn test_access_token_cannot_refresh() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let access = tokens.issue_access(user_id).unwrap();

    assert!(matches!(
        tokens.refresh(&db, &access).await,
        Err(CredentialError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let expired = stored_refresh(&db, &tokens, user_id, Duration::seconds(-10)).await;

    assert!(matches!(
        tokens.refresh(&db, &expired.token).await,
        Err(CredentialError::Expired)
    ));
    assert!(!db.refresh_token(expired.jti).await.unwrap().revoked);
}

// ============================================================================
// Revocation and logout
// ============================================================================

#[tokio::test]
async fn test_no_replay_after_logout() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let issued = stored_refresh(&db, &tokens, user_id, Duration::days(30)).await;

    tokens
        .logout(&db, &issued.token, user_id)
        .await
        .expect("logout should succeed");

    assert!(db.refresh_token(issued.jti).await.unwrap().revoked);
    assert!(matches!(
        tokens.refresh(&db, &issued.token).await,
        Err(CredentialError::Revoked)
    ));
    assert!(matches!(
        tokens.logout(&db, &issued.token, user_id).await,
        Err(CredentialError::Revoked)
    ));
}

#[tokio::test]
async fn test_logout_requires_ownership() {
    let db = MemoryDb::new();
    let tokens = manager();
    let owner = db.seed_user("ayu@example.com").await;
    let other = db.seed_user("budi@example.com").await;
    let issued = stored_refresh(&db, &tokens, owner, Duration::days(30)).await;

    assert!(matches!(
        tokens.logout(&db, &issued.token, other).await,
        Err(CredentialError::Revoked)
    ));
    assert!(!db.refresh_token(issued.jti).await.unwrap().revoked);
}

#[tokio::test]
async fn test_revoke_unknown_jti() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;

    assert!(matches!(
        tokens.revoke(&db, Uuid::new_v4(), user_id).await,
        Err(CredentialError::Revoked)
    ));
}

#[tokio::test]
async fn test_transient_revoke_failure_is_retried() {
    let db = MemoryDb::new();
    let tokens = manager();
    let user_id = db.seed_user("ayu@example.com").await;
    let issued = stored_refresh(&db, &tokens, user_id, Duration::days(30)).await;

    db.inject(FaultPoint::RefreshTokenRevoke, sqlx::Error::PoolTimedOut);

    tokens
        .revoke(&db, issued.jti, user_id)
        .await
        .expect("revoke should succeed on retry");
    assert!(db.refresh_token(issued.jti).await.unwrap().revoked);
}
