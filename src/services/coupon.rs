//! Coupon quota reservations.
//!
//! A [`CouponReservation`] is the compensating half of the invoice saga. It
//! exists only while one unit of a coupon's quota is held, and it gives that
//! unit back unless the saga calls [`CouponReservation::consume`]. Release
//! happens explicitly through [`CouponReservation::release`] on error paths,
//! or from `Drop` when the request future is abandoned mid-saga.
//!
//! A failed release is logged and counted but never surfaced: the request it
//! belongs to has already failed for another reason.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::db::CouponStore;
use crate::retry::{retry, RetryPolicy};

/// Thread-safe counters for coupon reservations.
#[derive(Debug, Default)]
pub struct SagaMetrics {
    reservations: AtomicU64,
    exhausted: AtomicU64,
    compensations: AtomicU64,
    compensation_failures: AtomicU64,
}

impl SagaMetrics {
    /// Returns the number of units successfully reserved.
    pub fn reservations(&self) -> u64 {
        self.reservations.load(Ordering::Relaxed)
    }

    /// Returns the number of reservation attempts that found no quota.
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Returns the number of units given back after a failed saga.
    pub fn compensations(&self) -> u64 {
        self.compensations.load(Ordering::Relaxed)
    }

    /// Returns the number of units that could not be given back.
    pub fn compensation_failures(&self) -> u64 {
        self.compensation_failures.load(Ordering::Relaxed)
    }

    fn record_reservation(&self) {
        self.reservations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("saga_reservations_total", "resource" => "coupon").increment(1);
    }

    fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("saga_reservations_exhausted_total", "resource" => "coupon")
            .increment(1);
    }

    fn record_compensation(&self) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("saga_compensations_total", "resource" => "coupon").increment(1);
    }

    fn record_compensation_failure(&self) {
        self.compensation_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("saga_compensation_failures_total", "resource" => "coupon")
            .increment(1);
    }
}

/// One unit of coupon quota held by an in-flight saga.
#[must_use = "an unconsumed reservation is released when dropped"]
pub struct CouponReservation<C>
where
    C: CouponStore + Clone + 'static,
{
    store: C,
    code: String,
    retry: RetryPolicy,
    metrics: Arc<SagaMetrics>,
    armed: bool,
}

impl<C> CouponReservation<C>
where
    C: CouponStore + Clone + 'static,
{
    /// Takes one unit of `code`. Returns `None` when the coupon is unknown,
    /// deleted or out of quota; that is a normal outcome, not an error.
    pub async fn acquire(
        store: &C,
        code: &str,
        retry_policy: RetryPolicy,
        metrics: Arc<SagaMetrics>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let affected = retry(&retry_policy, "reserve_coupon", || store.reserve_coupon(code)).await?;

        if affected != 1 {
            tracing::info!(coupon_code = code, "coupon exhausted or unknown, charging full price");
            metrics.record_exhausted();
            return Ok(None);
        }

        tracing::info!(coupon_code = code, "reserved coupon quota");
        metrics.record_reservation();
        Ok(Some(Self {
            store: store.clone(),
            code: code.to_string(),
            retry: retry_policy,
            metrics,
            armed: true,
        }))
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Keeps the unit. Call once the invoice that uses the coupon is stored.
    pub fn consume(mut self) {
        self.armed = false;
    }

    /// Gives the unit back and waits for the outcome.
    ///
    /// The release runs as its own task, so it still completes if the
    /// caller is cancelled while waiting.
    pub async fn release(mut self) {
        self.armed = false;
        let task = tokio::spawn(release_quota(
            self.store.clone(),
            std::mem::take(&mut self.code),
            self.retry,
            Arc::clone(&self.metrics),
        ));

        if let Err(err) = task.await {
            tracing::error!(error = %err, "coupon release task failed");
            self.metrics.record_compensation_failure();
        }
    }
}

impl<C> Drop for CouponReservation<C>
where
    C: CouponStore + Clone + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let code = std::mem::take(&mut self.code);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(coupon_code = %code, "reservation dropped while held, releasing");
                handle.spawn(release_quota(
                    self.store.clone(),
                    code,
                    self.retry,
                    Arc::clone(&self.metrics),
                ));
            }
            Err(_) => {
                tracing::error!(coupon_code = %code, "no runtime to release dropped coupon reservation");
                self.metrics.record_compensation_failure();
            }
        }
    }
}

async fn release_quota<C>(store: C, code: String, retry_policy: RetryPolicy, metrics: Arc<SagaMetrics>)
where
    C: CouponStore,
{
    match retry(&retry_policy, "release_coupon", || store.release_coupon(&code)).await {
        Ok(_) => {
            tracing::info!(coupon_code = %code, "released coupon quota");
            metrics.record_compensation();
        }
        Err(err) => {
            tracing::error!(
                coupon_code = %code,
                error = %err,
                "failed to release coupon quota"
            );
            metrics.record_compensation_failure();
        }
    }
}
