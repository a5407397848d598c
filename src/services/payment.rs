//! Invoices and payments.
//!
//! Invoice creation is a saga over three steps that cannot share a
//! transaction: reserve a coupon unit, create the gateway transaction, and
//! store the invoice. A held reservation is released whenever a later step
//! fails, so the coupon's quota is unchanged by a failed request.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{run_in_transaction, Database, InvoiceStore, PaymentTx};
use crate::error::{AppError, AppResult};
use crate::models::{Invoice, NewInvoice, NewPayment, NewSubscription, Payment};
use crate::retry::{retry, RetryPolicy};
use crate::services::coupon::{CouponReservation, SagaMetrics};
use crate::services::tripay::{GatewayError, PaymentGateway, TransactionRequest};
use crate::services::user::is_valid_email;

/// Default share of the plan price removed by a coupon.
pub const DEFAULT_DISCOUNT_PERCENT: u8 = 30;

/// Stored payment status that activates a subscription. Gateway statuses
/// are stored lowercased.
pub const STATUS_PAID: &str = "paid";

/// Request body for creating an invoice.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceRequest {
    pub plan_id: Uuid,
    #[serde(default)]
    pub coupon_code: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
}

/// Body of a gateway payment notification.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    pub reference: String,
    pub merchant_ref: String,
    pub total_amount: i32,
    pub status: String,
}

/// `price` minus `percent` percent, rounded half up to whole rupiah.
pub fn discounted_price(price: i32, percent: u8) -> i32 {
    let percent = i64::from(percent.min(100));
    let scaled = i64::from(price) * (100 - percent);
    // Non-negative prices only; the schema enforces price >= 0.
    ((scaled + 50) / 100) as i32
}

pub struct PaymentService<D: Database> {
    db: D,
    gateway: Arc<dyn PaymentGateway>,
    retry: RetryPolicy,
    discount_percent: u8,
    metrics: Arc<SagaMetrics>,
}

impl<D: Database> Clone for PaymentService<D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            gateway: Arc::clone(&self.gateway),
            retry: self.retry,
            discount_percent: self.discount_percent,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<D: Database> PaymentService<D> {
    pub fn new(
        db: D,
        gateway: Arc<dyn PaymentGateway>,
        retry: RetryPolicy,
        discount_percent: u8,
    ) -> Self {
        Self {
            db,
            gateway,
            retry,
            discount_percent,
            metrics: Arc::new(SagaMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &Arc<SagaMetrics> {
        &self.metrics
    }

    /// Creates an invoice for `user_id`, applying a coupon when one is held.
    ///
    /// An exhausted, unknown or deleted coupon does not fail the request;
    /// the invoice is created at full price without a `coupon_code`.
    pub async fn create_invoice(
        &self,
        user_id: Uuid,
        request: CreateInvoiceRequest,
    ) -> AppResult<Invoice> {
        validate_invoice_request(&request)?;

        let plan = retry(&self.retry, "find_plan", || self.db.find_plan(request.plan_id))
            .await?
            .ok_or_else(|| AppError::NotFound("Plan not found".to_string()))?;

        let coupon_code = request
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());

        let reservation = match coupon_code {
            Some(code) => {
                CouponReservation::acquire(&self.db, code, self.retry, Arc::clone(&self.metrics))
                    .await?
            }
            None => None,
        };

        let amount = if reservation.is_some() {
            discounted_price(plan.price, self.discount_percent)
        } else {
            plan.price
        };

        let merchant_ref = Uuid::new_v4();
        let transaction = match self
            .gateway
            .create_transaction(&TransactionRequest {
                merchant_ref,
                amount,
                customer_name: request.customer_name.trim().to_string(),
                customer_email: request.customer_email.trim().to_string(),
                plan_id: plan.id,
                plan_type: plan.plan_type.clone(),
                plan_name: plan.name.clone(),
            })
            .await
        {
            Ok(transaction) => transaction,
            Err(err) => {
                tracing::error!(%merchant_ref, error = %err, "failed to create gateway transaction");
                if let Some(reservation) = reservation {
                    reservation.release().await;
                }
                return Err(err.into());
            }
        };

        let invoice = NewInvoice {
            id: merchant_ref,
            user_id,
            plan_id: plan.id,
            ref_id: transaction.reference,
            coupon_code: reservation.as_ref().map(|r| r.code().to_string()),
            total_amount: transaction.amount,
            qr_url: transaction.qr_url,
            expires_at: transaction.expires_at,
        };

        match retry(&self.retry, "insert_invoice", || self.db.insert_invoice(&invoice)).await {
            Ok(invoice) => {
                if let Some(reservation) = reservation {
                    reservation.consume();
                }
                tracing::info!(
                    invoice_id = %invoice.id,
                    %user_id,
                    total_amount = invoice.total_amount,
                    coupon_code = invoice.coupon_code.as_deref(),
                    "created invoice"
                );
                Ok(invoice)
            }
            Err(err) => {
                tracing::error!(%merchant_ref, error = %err, "failed to store invoice");
                if let Some(reservation) = reservation {
                    reservation.release().await;
                }
                Err(err.into())
            }
        }
    }

    /// The newest unpaid, unexpired invoice of `user_id`.
    pub async fn active_invoice(&self, user_id: Uuid) -> AppResult<Option<Invoice>> {
        let invoice = retry(&self.retry, "find_active_invoice", || {
            self.db.find_active_invoice(user_id)
        })
        .await?;
        Ok(invoice)
    }

    /// Every payment of `user_id`, newest first.
    pub async fn payments(&self, user_id: Uuid) -> AppResult<Vec<Payment>> {
        let payments = retry(&self.retry, "find_payments", || self.db.find_payments(user_id)).await?;
        Ok(payments)
    }

    /// Verifies and records a gateway payment notification.
    ///
    /// A `PAID` notification stores the payment and the subscription it buys
    /// in one transaction. Any other status only stores the payment.
    pub async fn process_callback(&self, signature: &str, body: &[u8]) -> AppResult<Payment> {
        self.gateway
            .verify_callback(signature, body)
            .map_err(|err| match err {
                GatewayError::InvalidSignature => {
                    AppError::Forbidden("Invalid callback signature".to_string())
                }
                other => AppError::Gateway(other),
            })?;

        let callback: PaymentCallback = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid callback body: {}", e)))?;

        let invoice_id = Uuid::parse_str(&callback.merchant_ref)
            .map_err(|_| AppError::NotFound("Invoice not found".to_string()))?;
        let invoice = retry(&self.retry, "find_invoice", || self.db.find_invoice(invoice_id))
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;

        if invoice.ref_id != callback.reference {
            tracing::warn!(
                %invoice_id,
                expected = %invoice.ref_id,
                received = %callback.reference,
                "callback reference does not match invoice"
            );
        }

        let payment = NewPayment {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            user_id: invoice.user_id,
            amount_paid: callback.total_amount,
            status: callback.status.to_lowercase(),
        };

        let payment = if payment.status == STATUS_PAID {
            self.record_paid(payment).await?
        } else {
            retry(&self.retry, "insert_payment", || self.db.insert_payment(&payment)).await?
        };

        tracing::info!(
            %invoice_id,
            payment_id = %payment.id,
            status = %payment.status,
            "recorded payment"
        );
        Ok(payment)
    }

    async fn record_paid(&self, payment: NewPayment) -> AppResult<Payment> {
        run_in_transaction(&self.db, &self.retry, move |tx| {
            let payment = payment.clone();
            Box::pin(async move {
                let payment = tx.insert_payment(&payment).await?;
                let plan = tx
                    .find_plan_for_invoice(payment.invoice_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Plan not found".to_string()))?;

                let start_date = Utc::now();
                let end_date = plan.subscription_end(start_date).ok_or_else(|| {
                    AppError::Internal(format!("invalid plan duration for plan {}", plan.id))
                })?;

                tx.insert_subscription(&NewSubscription {
                    id: Uuid::new_v4(),
                    user_id: payment.user_id,
                    plan_id: plan.id,
                    payment_id: payment.id,
                    start_date,
                    end_date,
                })
                .await?;

                Ok::<_, AppError>(payment)
            })
        })
        .await
    }
}

fn validate_invoice_request(request: &CreateInvoiceRequest) -> AppResult<()> {
    if request.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest("customer_name is required".to_string()));
    }
    let email = request.customer_email.trim();
    if !is_valid_email(email) {
        return Err(AppError::BadRequest("customer_email is invalid".to_string()));
    }
    Ok(())
}
