//! In-process storage backend for tests. The server always runs on
//! Postgres.
//!
//! [`MemoryDb`] implements every storage trait over plain collections. A
//! transaction holds the whole database exclusively until it finishes, so
//! transactions are serializable; rollback (explicit, failed commit, or drop)
//! restores the snapshot taken at begin. Pool-level statements wait for any
//! open transaction, so a unit of work must not call them on the same
//! database while it holds a transaction.
//!
//! Constraints mirror the SQL schema: unique violations and foreign key
//! violations come back as `sqlx::Error::Database` with the Postgres
//! SQLSTATE codes.
//!
//! Failures can be scheduled with [`MemoryDb::inject`]; each injected error
//! is returned once, by the next statement at that [`FaultPoint`].

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::error::{DatabaseError, ErrorKind};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::store::{
    CouponStore, CredentialStore, CredentialTx, InvoiceStore, PaymentTx, UserStore, UserTx,
};
use super::transaction::{TransactionSource, UnitOfWork};
use crate::models::{
    Coupon, Invoice, NewInvoice, NewPayment, NewRefreshToken, NewSubscription, NewUser, Payment,
    Plan, RefreshToken, Subscription, User,
};

/// Places where an injected failure can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    Commit,
    RefreshTokenInsert,
    RefreshTokenRevoke,
    UserInsert,
    PaymentInsert,
    SubscriptionInsert,
    CouponReserve,
    CouponRelease,
    InvoiceInsert,
}

type Faults = Arc<Mutex<HashMap<FaultPoint, VecDeque<sqlx::Error>>>>;

fn take_fault(faults: &Faults, point: FaultPoint) -> Result<(), sqlx::Error> {
    let mut faults = faults.lock().unwrap_or_else(PoisonError::into_inner);
    match faults.get_mut(&point).and_then(VecDeque::pop_front) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    coupons: HashMap<String, Coupon>,
    plans: HashMap<Uuid, Plan>,
    invoices: HashMap<Uuid, Invoice>,
    payments: HashMap<Uuid, Payment>,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl Tables {
    fn insert_refresh_token(&mut self, token: &NewRefreshToken) -> Result<(), sqlx::Error> {
        if !self.users.contains_key(&token.user_id) {
            return Err(Violation::foreign_key("refresh_tokens_user_id_fkey"));
        }
        if self.refresh_tokens.contains_key(&token.id) {
            return Err(Violation::unique("refresh_tokens_pkey"));
        }
        self.refresh_tokens.insert(token.id, token.clone().into());
        Ok(())
    }

    fn revoke_refresh_token(&mut self, jti: Uuid, user_id: Uuid) -> u64 {
        match self.refresh_tokens.get_mut(&jti) {
            Some(token) if token.user_id == user_id && !token.revoked => {
                token.revoked = true;
                1
            }
            _ => 0,
        }
    }

    fn insert_user(&mut self, user: &NewUser) -> Result<User, sqlx::Error> {
        if self.users.contains_key(&user.id) {
            return Err(Violation::unique("users_pkey"));
        }
        if self.users.values().any(|u| u.email == user.email) {
            return Err(Violation::unique("users_email_key"));
        }
        let user: User = user.clone().into();
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn record_login(&mut self, user_id: Uuid) -> u64 {
        match self.users.get_mut(&user_id) {
            Some(user) => {
                let now = Utc::now();
                user.last_login_at = Some(now);
                user.updated_at = now;
                1
            }
            None => 0,
        }
    }

    fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, sqlx::Error> {
        if !self.invoices.contains_key(&payment.invoice_id) {
            return Err(Violation::foreign_key("payments_invoice_id_fkey"));
        }
        if !self.users.contains_key(&payment.user_id) {
            return Err(Violation::foreign_key("payments_user_id_fkey"));
        }
        if self.payments.contains_key(&payment.id) {
            return Err(Violation::unique("payments_pkey"));
        }
        let payment: Payment = payment.clone().into();
        self.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    fn plan_for_invoice(&self, invoice_id: Uuid) -> Option<Plan> {
        let invoice = self.invoices.get(&invoice_id)?;
        self.plans.get(&invoice.plan_id).cloned()
    }

    fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        if !self.payments.contains_key(&subscription.payment_id) {
            return Err(Violation::foreign_key("subscriptions_payment_id_fkey"));
        }
        if self
            .subscriptions
            .values()
            .any(|s| s.id == subscription.id || s.payment_id == subscription.payment_id)
        {
            return Err(Violation::unique("subscriptions_payment_id_key"));
        }
        let subscription: Subscription = subscription.clone().into();
        self.subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Invoice, sqlx::Error> {
        if !self.users.contains_key(&invoice.user_id) {
            return Err(Violation::foreign_key("invoices_user_id_fkey"));
        }
        if !self.plans.contains_key(&invoice.plan_id) {
            return Err(Violation::foreign_key("invoices_plan_id_fkey"));
        }
        if let Some(code) = &invoice.coupon_code {
            if !self.coupons.contains_key(code) {
                return Err(Violation::foreign_key("invoices_coupon_code_fkey"));
            }
        }
        if self.invoices.contains_key(&invoice.id) {
            return Err(Violation::unique("invoices_pkey"));
        }
        if self.invoices.values().any(|i| i.ref_id == invoice.ref_id) {
            return Err(Violation::unique("invoices_ref_id_key"));
        }
        let invoice: Invoice = invoice.clone().into();
        self.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    fn find_active_invoice(&self, user_id: Uuid) -> Option<Invoice> {
        let now = Utc::now();
        self.invoices
            .values()
            .filter(|i| i.user_id == user_id && i.expires_at > now)
            .filter(|i| !self.payments.values().any(|p| p.invoice_id == i.id))
            .max_by_key(|i| i.created_at)
            .cloned()
    }
}

/// In-memory database. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Faults,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `err` to be returned by the next statement at `point`.
    /// Errors scheduled for the same point are returned in order.
    pub fn inject(&self, point: FaultPoint, err: sqlx::Error) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(point)
            .or_default()
            .push_back(err);
    }

    /// Number of injected errors at `point` that have not fired yet.
    pub fn pending_faults(&self, point: FaultPoint) -> usize {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&point)
            .map_or(0, VecDeque::len)
    }

    /// Inserts a user with a placeholder password hash and returns its id.
    pub async fn seed_user(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        let user: User = NewUser {
            id,
            email: email.to_string(),
            username: email.split('@').next().unwrap_or(email).to_string(),
            password_hash: String::new(),
        }
        .into();
        self.tables.lock().await.users.insert(id, user);
        id
    }

    pub async fn seed_coupon(&self, code: &str, quota: i32) {
        let coupon = Coupon {
            code: code.to_string(),
            influencer_username: "influencer".to_string(),
            quota,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.tables
            .lock()
            .await
            .coupons
            .insert(coupon.code.clone(), coupon);
    }

    /// Soft-deletes a coupon, leaving its quota untouched.
    pub async fn delete_coupon(&self, code: &str) {
        if let Some(coupon) = self.tables.lock().await.coupons.get_mut(code) {
            coupon.deleted_at = Some(Utc::now());
        }
    }

    pub async fn seed_plan(&self, price: i32, duration_in_months: i32) -> Plan {
        let plan = Plan {
            id: Uuid::new_v4(),
            plan_type: "premium".to_string(),
            name: format!("Premium {duration_in_months} month"),
            price,
            duration_in_months,
            created_at: Utc::now(),
        };
        self.tables.lock().await.plans.insert(plan.id, plan.clone());
        plan
    }

    /// Inserts an invoice that expired an hour ago.
    pub async fn seed_expired_invoice(&self, user_id: Uuid, plan_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let mut invoice: Invoice = NewInvoice {
            id,
            user_id,
            plan_id,
            ref_id: format!("T-{id}"),
            coupon_code: None,
            total_amount: 0,
            qr_url: String::new(),
            expires_at: Utc::now() - Duration::hours(1),
        }
        .into();
        invoice.created_at = Utc::now() - Duration::hours(2);
        self.tables.lock().await.invoices.insert(id, invoice);
        id
    }

    pub async fn coupon_quota(&self, code: &str) -> Option<i32> {
        self.tables.lock().await.coupons.get(code).map(|c| c.quota)
    }

    pub async fn user(&self, user_id: Uuid) -> Option<User> {
        self.tables.lock().await.users.get(&user_id).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    /// Looks a refresh token up by JTI alone.
    pub async fn refresh_token(&self, jti: Uuid) -> Option<RefreshToken> {
        self.tables.lock().await.refresh_tokens.get(&jti).cloned()
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.tables.lock().await.refresh_tokens.len()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.tables.lock().await.invoices.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.lock().await.payments.values().cloned().collect()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.tables
            .lock()
            .await
            .subscriptions
            .values()
            .cloned()
            .collect()
    }
}

/// An open [`MemoryDb`] transaction.
pub struct MemoryTx {
    tables: OwnedMutexGuard<Tables>,
    /// State at begin; `None` once committed.
    snapshot: Option<Tables>,
    faults: Faults,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.tables = snapshot;
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryTx {
    async fn commit(mut self) -> Result<(), sqlx::Error> {
        take_fault(&self.faults, FaultPoint::Commit)?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        drop(self);
        Ok(())
    }
}

#[async_trait]
impl TransactionSource for MemoryDb {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::Begin)?;
        let tables = Arc::clone(&self.tables).lock_owned().await;
        let snapshot = Some((*tables).clone());
        Ok(MemoryTx {
            tables,
            snapshot,
            faults: Arc::clone(&self.faults),
        })
    }
}

#[async_trait]
impl CredentialTx for MemoryTx {
    async fn insert_refresh_token(&mut self, token: &NewRefreshToken) -> Result<(), sqlx::Error> {
        take_fault(&self.faults, FaultPoint::RefreshTokenInsert)?;
        self.tables.insert_refresh_token(token)
    }

    async fn revoke_refresh_token(&mut self, jti: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::RefreshTokenRevoke)?;
        Ok(self.tables.revoke_refresh_token(jti, user_id))
    }
}

#[async_trait]
impl UserTx for MemoryTx {
    async fn insert_user(&mut self, user: &NewUser) -> Result<User, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::UserInsert)?;
        self.tables.insert_user(user)
    }

    async fn record_login(&mut self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        Ok(self.tables.record_login(user_id))
    }
}

#[async_trait]
impl PaymentTx for MemoryTx {
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::PaymentInsert)?;
        self.tables.insert_payment(payment)
    }

    async fn find_plan_for_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        Ok(self.tables.plan_for_invoice(invoice_id))
    }

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::SubscriptionInsert)?;
        self.tables.insert_subscription(subscription)
    }
}

#[async_trait]
impl CredentialStore for MemoryDb {
    async fn find_refresh_token(
        &self,
        jti: Uuid,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>, sqlx::Error> {
        let tables = self.tables.lock().await;
        Ok(tables
            .refresh_tokens
            .get(&jti)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn revoke_refresh_token(&self, jti: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::RefreshTokenRevoke)?;
        Ok(self.tables.lock().await.revoke_refresh_token(jti, user_id))
    }
}

#[async_trait]
impl UserStore for MemoryDb {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }
}

#[async_trait]
impl CouponStore for MemoryDb {
    async fn reserve_coupon(&self, code: &str) -> Result<u64, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::CouponReserve)?;
        let mut tables = self.tables.lock().await;
        match tables.coupons.get_mut(code) {
            Some(coupon) if coupon.is_redeemable() => {
                coupon.quota -= 1;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn release_coupon(&self, code: &str) -> Result<u64, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::CouponRelease)?;
        let mut tables = self.tables.lock().await;
        match tables.coupons.get_mut(code) {
            Some(coupon) => {
                coupon.quota += 1;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl InvoiceStore for MemoryDb {
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        Ok(self.tables.lock().await.plans.get(&plan_id).cloned())
    }

    async fn insert_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::InvoiceInsert)?;
        self.tables.lock().await.insert_invoice(invoice)
    }

    async fn find_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, sqlx::Error> {
        Ok(self.tables.lock().await.invoices.get(&invoice_id).cloned())
    }

    async fn find_active_invoice(&self, user_id: Uuid) -> Result<Option<Invoice>, sqlx::Error> {
        Ok(self.tables.lock().await.find_active_invoice(user_id))
    }

    async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment, sqlx::Error> {
        take_fault(&self.faults, FaultPoint::PaymentInsert)?;
        self.tables.lock().await.insert_payment(payment)
    }

    async fn find_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, sqlx::Error> {
        let tables = self.tables.lock().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}

/// A constraint violation reported the way Postgres reports it.
#[derive(Debug)]
struct Violation {
    kind: ViolationKind,
    constraint: &'static str,
    message: String,
}

#[derive(Debug, Clone, Copy)]
enum ViolationKind {
    Unique,
    ForeignKey,
}

impl Violation {
    fn unique(constraint: &'static str) -> sqlx::Error {
        Self::build(ViolationKind::Unique, constraint, "duplicate key value violates unique constraint")
    }

    fn foreign_key(constraint: &'static str) -> sqlx::Error {
        Self::build(ViolationKind::ForeignKey, constraint, "insert violates foreign key constraint")
    }

    fn build(kind: ViolationKind, constraint: &'static str, message: &str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(Self {
            kind,
            constraint,
            message: format!("{message} \"{constraint}\""),
        }))
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Violation {}

impl DatabaseError for Violation {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(match self.kind {
            ViolationKind::Unique => "23505",
            ViolationKind::ForeignKey => "23503",
        }))
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn constraint(&self) -> Option<&str> {
        Some(self.constraint)
    }

    fn kind(&self) -> ErrorKind {
        match self.kind {
            ViolationKind::Unique => ErrorKind::UniqueViolation,
            ViolationKind::ForeignKey => ErrorKind::ForeignKeyViolation,
        }
    }
}
