//! Plans, invoices, payments and subscriptions.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A purchasable subscription plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub plan_type: String,
    pub name: String,
    /// Price in rupiah
    pub price: i32,
    pub duration_in_months: i32,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// End of a subscription to this plan that starts at `start`.
    ///
    /// Returns `None` for a negative duration or a date past chrono's range.
    pub fn subscription_end(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = u32::try_from(self.duration_in_months).ok()?;
        start.checked_add_months(Months::new(months))
    }
}

/// A pending order at the payment gateway.
///
/// `id` doubles as the merchant reference sent to the gateway; `ref_id` is
/// the reference the gateway handed back.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub ref_id: String,
    pub coupon_code: Option<String>,
    pub total_amount: i32,
    pub qr_url: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub ref_id: String,
    pub coupon_code: Option<String>,
    pub total_amount: i32,
    pub qr_url: String,
    pub expires_at: DateTime<Utc>,
}

impl From<NewInvoice> for Invoice {
    fn from(invoice: NewInvoice) -> Self {
        Self {
            id: invoice.id,
            user_id: invoice.user_id,
            plan_id: invoice.plan_id,
            ref_id: invoice.ref_id,
            coupon_code: invoice.coupon_code,
            total_amount: invoice.total_amount,
            qr_url: invoice.qr_url,
            expires_at: invoice.expires_at,
            created_at: Utc::now(),
        }
    }
}

/// A payment notification recorded against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub user_id: Uuid,
    pub amount_paid: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub user_id: Uuid,
    pub amount_paid: i32,
    pub status: String,
}

impl From<NewPayment> for Payment {
    fn from(payment: NewPayment) -> Self {
        Self {
            id: payment.id,
            invoice_id: payment.invoice_id,
            user_id: payment.user_id,
            amount_paid: payment.amount_paid,
            status: payment.status,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub payment_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub payment_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl From<NewSubscription> for Subscription {
    fn from(sub: NewSubscription) -> Self {
        Self {
            id: sub.id,
            user_id: sub.user_id,
            plan_id: sub.plan_id,
            payment_id: sub.payment_id,
            start_date: sub.start_date,
            end_date: sub.end_date,
            created_at: Utc::now(),
        }
    }
}
