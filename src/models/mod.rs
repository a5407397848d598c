//! Database row types.

pub mod coupon;
pub mod payment;
pub mod token;
pub mod user;

pub use coupon::Coupon;
pub use payment::{
    Invoice, NewInvoice, NewPayment, NewSubscription, Payment, Plan, Subscription,
};
pub use token::{NewRefreshToken, RefreshToken};
pub use user::{NewUser, User};
