//! Bounded retry for single operations (one SQL statement or one external call).
//!
//! Errors decide for themselves whether another attempt can help through the
//! [`Retryable`] trait. Domain outcomes (row not found, uniqueness violations,
//! rejected credentials) are surfaced on the first attempt; transient
//! infrastructure failures are retried until the policy is exhausted, and the
//! last observed error is returned.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Default number of attempts for database statements and transactions.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default linear backoff step between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(25);

/// Classifies an error as transient (worth retrying) or final.
pub trait Retryable {
    /// Returns `true` when repeating the same operation may succeed.
    fn is_retryable(&self) -> bool;
}

/// How many times an operation is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Wait before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt bound and backoff step.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that retries without waiting. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Whether a failure on `attempt` (1-based) with `err` should be retried.
    pub fn should_retry<E: Retryable>(&self, attempt: u32, err: &E) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }

    /// Sleeps for the backoff that follows a failed `attempt`.
    pub async fn wait(&self, attempt: u32) {
        let delay = self.backoff.saturating_mul(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt bound is reached.
///
/// `operation` names the unit of work in log output.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if policy.should_retry(attempt, &err) => {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "transient failure, retrying"
                );
                policy.wait(attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

impl Retryable for sqlx::Error {
    fn is_retryable(&self) -> bool {
        match self {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db_err) => db_err
                .code()
                .map(|code| is_transient_sqlstate(&code))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// SQLSTATE codes that describe a failed attempt rather than a bad request:
/// connection exceptions (class 08), serialization failures, deadlocks and
/// server shutdowns.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57P01" | "57P02" | "57P03")
}
