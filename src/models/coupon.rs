//! Coupon model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A discount code with a finite number of remaining uses.
///
/// `quota` never goes below zero. It is only changed by the conditional
/// reserve (decrement) and the compensating release (increment).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub code: String,
    pub influencer_username: String,
    pub quota: i32,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Coupon {
    /// Whether a reservation against this coupon would succeed right now.
    pub fn is_redeemable(&self) -> bool {
        self.deleted_at.is_none() && self.quota > 0
    }
}
