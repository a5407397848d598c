//! Retryable transactions.
//!
//! [`run_in_transaction`] opens a transaction, hands it to a caller-supplied
//! unit of work, commits on success and rolls back on any error. The whole
//! begin → work → commit sequence is retried under a [`RetryPolicy`] when the
//! failure is transient, so callers observe either every write of the unit or
//! none of them.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::store::{CredentialTx, PaymentTx, UserTx};
use crate::retry::{RetryPolicy, Retryable};

/// Boxed future returned by a unit of work; it borrows the transaction for `'t`.
pub type TxFuture<'t, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 't>>;

/// An open transaction that must be finished by exactly one of
/// [`commit`](UnitOfWork::commit) or [`rollback`](UnitOfWork::rollback).
///
/// Dropping an unfinished transaction discards its writes.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    async fn commit(self) -> Result<(), sqlx::Error>;
    async fn rollback(self) -> Result<(), sqlx::Error>;
}

/// Something transactions can be started on.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    type Tx: UnitOfWork + CredentialTx + UserTx + PaymentTx;

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error>;
}

#[async_trait]
impl UnitOfWork for Transaction<'static, Postgres> {
    async fn commit(self) -> Result<(), sqlx::Error> {
        Transaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        Transaction::rollback(self).await
    }
}

#[async_trait]
impl TransactionSource for PgPool {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error> {
        sqlx::Pool::begin(self).await
    }
}

/// Executes `work` inside a transaction on `source`, retrying the complete
/// sequence on transient failure.
///
/// `work` may run more than once, so it must not carry side effects outside
/// the transaction. Non-retryable errors are surfaced after the first
/// rollback.
///
/// # Example
///
/// ```ignore
/// let row = run_in_transaction(&pool, &policy, move |tx| {
///     Box::pin(async move {
///         let affected = tx.revoke_refresh_token(jti, user_id).await?;
///         Ok::<_, AppError>(affected)
///     })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<S, T, E, F>(
    source: &S,
    policy: &RetryPolicy,
    mut work: F,
) -> Result<T, E>
where
    S: TransactionSource,
    E: From<sqlx::Error> + Retryable + Display,
    F: for<'t> FnMut(&'t mut S::Tx) -> TxFuture<'t, T, E>,
{
    let mut attempt = 1;
    loop {
        match attempt_once(source, &mut work).await {
            Ok(value) => return Ok(value),
            Err(err) if policy.should_retry(attempt, &err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "transaction failed with a transient error, retrying"
                );
                policy.wait(attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn attempt_once<S, T, E, F>(source: &S, work: &mut F) -> Result<T, E>
where
    S: TransactionSource,
    E: From<sqlx::Error> + Display,
    F: for<'t> FnMut(&'t mut S::Tx) -> TxFuture<'t, T, E>,
{
    let mut tx = source.begin().await?;

    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "failed to roll back transaction"
                );
            }
            Err(err)
        }
    }
}
