//! PostgreSQL implementations of the storage traits.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::store::{
    CouponStore, CredentialStore, CredentialTx, InvoiceStore, PaymentTx, UserStore, UserTx,
};
use crate::models::{
    Invoice, NewInvoice, NewPayment, NewRefreshToken, NewSubscription, NewUser, Payment, Plan,
    RefreshToken, Subscription, User,
};

const REVOKE_REFRESH_TOKEN: &str = r#"
    UPDATE refresh_tokens
    SET revoked = TRUE
    WHERE id = $1 AND user_id = $2 AND revoked = FALSE
"#;

const INSERT_PAYMENT: &str = r#"
    INSERT INTO payments (id, invoice_id, user_id, amount_paid, status)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id, invoice_id, user_id, amount_paid, status, created_at
"#;

const PAYMENT_COLUMNS: &str = "id, invoice_id, user_id, amount_paid, status, created_at";

const PLAN_COLUMNS: &str = "id, type, name, price, duration_in_months, created_at";

const INVOICE_COLUMNS: &str =
    "id, user_id, plan_id, ref_id, coupon_code, total_amount, qr_url, expires_at, created_at";

#[async_trait]
impl CredentialTx for Transaction<'static, Postgres> {
    async fn insert_refresh_token(&mut self, token: &NewRefreshToken) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.expires_at)
        .execute(&mut **self)
        .await?;
        Ok(())
    }

    async fn revoke_refresh_token(&mut self, jti: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(REVOKE_REFRESH_TOKEN)
            .bind(jti)
            .bind(user_id)
            .execute(&mut **self)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserTx for Transaction<'static, Postgres> {
    async fn insert_user(&mut self, user: &NewUser) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, username, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, username, password_hash, last_login_at, created_at, updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .fetch_one(&mut **self)
        .await
    }

    async fn record_login(&mut self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut **self)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PaymentTx for Transaction<'static, Postgres> {
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, sqlx::Error> {
        sqlx::query_as::<_, Payment>(INSERT_PAYMENT)
            .bind(payment.id)
            .bind(payment.invoice_id)
            .bind(payment.user_id)
            .bind(payment.amount_paid)
            .bind(&payment.status)
            .fetch_one(&mut **self)
            .await
    }

    async fn find_plan_for_invoice(&mut self, invoice_id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT p.id, p.type, p.name, p.price, p.duration_in_months, p.created_at
            FROM plans p
            JOIN invoices i ON i.plan_id = p.id
            WHERE i.id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut **self)
        .await
    }

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_id, payment_id, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, plan_id, payment_id, start_date, end_date, created_at
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.plan_id)
        .bind(subscription.payment_id)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .fetch_one(&mut **self)
        .await
    }
}

#[async_trait]
impl CredentialStore for PgPool {
    async fn find_refresh_token(
        &self,
        jti: Uuid,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, user_id, revoked, expires_at, created_at
            FROM refresh_tokens
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(jti)
        .bind(user_id)
        .fetch_optional(self)
        .await
    }

    async fn revoke_refresh_token(&self, jti: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(REVOKE_REFRESH_TOKEN)
            .bind(jti)
            .bind(user_id)
            .execute(self)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for PgPool {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password_hash, last_login_at, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(self)
        .await
    }
}

#[async_trait]
impl CouponStore for PgPool {
    async fn reserve_coupon(&self, code: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET quota = quota - 1
            WHERE code = $1 AND quota > 0 AND deleted_at IS NULL
            "#,
        )
        .bind(code)
        .execute(self)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_coupon(&self, code: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE coupons SET quota = quota + 1 WHERE code = $1")
            .bind(code)
            .execute(self)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InvoiceStore for PgPool {
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"))
            .bind(plan_id)
            .fetch_optional(self)
            .await
    }

    async fn insert_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, sqlx::Error> {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices
                (id, user_id, plan_id, ref_id, coupon_code, total_amount, qr_url, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice.id)
        .bind(invoice.user_id)
        .bind(invoice.plan_id)
        .bind(&invoice.ref_id)
        .bind(&invoice.coupon_code)
        .bind(invoice.total_amount)
        .bind(&invoice.qr_url)
        .bind(invoice.expires_at)
        .fetch_one(self)
        .await
    }

    async fn find_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, sqlx::Error> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(self)
        .await
    }

    async fn find_active_invoice(&self, user_id: Uuid) -> Result<Option<Invoice>, sqlx::Error> {
        sqlx::query_as::<_, Invoice>(
            r#"
            SELECT i.id, i.user_id, i.plan_id, i.ref_id, i.coupon_code, i.total_amount,
                   i.qr_url, i.expires_at, i.created_at
            FROM invoices i
            LEFT JOIN payments p ON p.invoice_id = i.id
            WHERE i.user_id = $1 AND i.expires_at > NOW() AND p.id IS NULL
            ORDER BY i.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self)
        .await
    }

    async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment, sqlx::Error> {
        sqlx::query_as::<_, Payment>(INSERT_PAYMENT)
            .bind(payment.id)
            .bind(payment.invoice_id)
            .bind(payment.user_id)
            .bind(payment.amount_paid)
            .bind(&payment.status)
            .fetch_one(self)
            .await
    }

    async fn find_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(self)
        .await
    }
}
