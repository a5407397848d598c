//! Storage traits.
//!
//! `*Tx` traits are statements that run on an open transaction and take part
//! in its commit or rollback. `*Store` traits are single statements that run
//! on their own, straight against the pool.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Invoice, NewInvoice, NewPayment, NewRefreshToken, NewSubscription, NewUser, Payment, Plan,
    RefreshToken, Subscription, User,
};

#[async_trait]
pub trait CredentialTx: Send {
    async fn insert_refresh_token(&mut self, token: &NewRefreshToken) -> Result<(), sqlx::Error>;

    /// Revokes the token only if it belongs to `user_id` and is not revoked yet.
    /// Returns the number of rows changed (0 or 1).
    async fn revoke_refresh_token(&mut self, jti: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait UserTx: Send {
    async fn insert_user(&mut self, user: &NewUser) -> Result<User, sqlx::Error>;

    /// Stamps `last_login_at` with the current time.
    async fn record_login(&mut self, user_id: Uuid) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait PaymentTx: Send {
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, sqlx::Error>;

    async fn find_plan_for_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Plan>, sqlx::Error>;

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, sqlx::Error>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_refresh_token(
        &self,
        jti: Uuid,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>, sqlx::Error>;

    /// Same contract as [`CredentialTx::revoke_refresh_token`], outside a transaction.
    async fn revoke_refresh_token(&self, jti: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error>;
}

/// The two halves of a coupon reservation.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Conditionally takes one unit of quota: only when the coupon exists, is
    /// not soft-deleted and has `quota > 0`. Returns the rows changed, so 1
    /// means the unit is held by the caller.
    async fn reserve_coupon(&self, code: &str) -> Result<u64, sqlx::Error>;

    /// Gives one unit of quota back.
    async fn release_coupon(&self, code: &str) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, sqlx::Error>;

    async fn insert_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, sqlx::Error>;

    async fn find_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, sqlx::Error>;

    /// The newest invoice of `user_id` that has not expired and has no payment.
    async fn find_active_invoice(&self, user_id: Uuid) -> Result<Option<Invoice>, sqlx::Error>;

    async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment, sqlx::Error>;

    /// Every payment recorded for `user_id`, newest first.
    async fn find_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, sqlx::Error>;
}
