//! Database access.
//!
//! Provides pool creation and migrations for PostgreSQL, the storage traits
//! the services are written against, and the retryable transaction runner.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod transaction;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub use memory::{FaultPoint, MemoryDb};
pub use store::{
    CouponStore, CredentialStore, CredentialTx, InvoiceStore, PaymentTx, UserStore, UserTx,
};
pub use transaction::{run_in_transaction, TransactionSource, TxFuture, UnitOfWork};

/// Maximum connections held by the pool.
pub const MAX_CONNECTIONS: u32 = 5;

/// How long to wait for a free connection before failing with `PoolTimedOut`.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Every storage capability the HTTP layer needs, in one bound.
///
/// Implemented for [`PgPool`] and [`MemoryDb`].
pub trait Database:
    TransactionSource + CredentialStore + UserStore + CouponStore + InvoiceStore + Clone + 'static
{
}

impl<T> Database for T where
    T: TransactionSource + CredentialStore + UserStore + CouponStore + InvoiceStore + Clone + 'static
{
}

/// Creates a PostgreSQL connection pool.
///
/// # Arguments
/// * `database_url` - The PostgreSQL connection string
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Runs all pending database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
