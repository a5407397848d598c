//! Invoice and payment handlers.
//!
//! Registered only when gateway credentials are configured:
//! - `GET /invoices/active` - The caller's open invoice, or `null`
//! - `POST /invoices` - Creates an invoice, optionally with a coupon
//! - `GET /payments` - The caller's payment history
//! - `POST /payments/callback` - Gateway payment notification

use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::handlers::auth::{AppState, StatusResponse};
use crate::middleware::auth::AuthenticatedUser;
use crate::services::payment::{CreateInvoiceRequest, PaymentService};

/// Header carrying the gateway's HMAC of the raw callback body.
pub const CALLBACK_SIGNATURE_HEADER: &str = "X-Callback-Signature";

/// GET /invoices/active
pub async fn active_invoice<D: Database>(
    payments: web::Data<PaymentService<D>>,
    user: AuthenticatedUser,
) -> AppResult<HttpResponse> {
    let invoice = payments.active_invoice(user.user_id).await?;
    Ok(HttpResponse::Ok().json(invoice))
}

/// POST /invoices
///
/// Returns 201 with the invoice and a `Location` header pointing at it.
pub async fn create_invoice<D: Database>(
    state: web::Data<AppState<D>>,
    payments: web::Data<PaymentService<D>>,
    user: AuthenticatedUser,
    body: web::Json<CreateInvoiceRequest>,
) -> AppResult<HttpResponse> {
    let invoice = payments
        .create_invoice(user.user_id, body.into_inner())
        .await?;
    let location = format!("{}/invoices/{}", state.config.origin_url, invoice.id);

    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, location))
        .json(invoice))
}

/// GET /payments
pub async fn list_payments<D: Database>(
    payments: web::Data<PaymentService<D>>,
    user: AuthenticatedUser,
) -> AppResult<HttpResponse> {
    let history = payments.payments(user.user_id).await?;
    Ok(HttpResponse::Ok().json(history))
}

/// POST /payments/callback
///
/// The body is read raw because the signature covers its exact bytes.
pub async fn payment_callback<D: Database>(
    req: HttpRequest,
    payments: web::Data<PaymentService<D>>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let signature = req
        .headers()
        .get(CALLBACK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Forbidden("Missing callback signature".to_string()))?;

    payments.process_callback(signature, &body).await?;
    Ok(HttpResponse::Ok().json(StatusResponse { status: true }))
}
