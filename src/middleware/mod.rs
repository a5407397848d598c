//! Middleware for the demi-masa API.
//!
//! This module contains:
//! - `auth` - Bearer token extractors (AuthenticatedUser, BearerToken)
//! - `rate_limit` - Rate limiting middleware using Governor

pub mod auth;
pub mod rate_limit;

// Re-export commonly used types
pub use auth::{AuthError, AuthenticatedUser, BearerToken};
pub use rate_limit::{create_rate_limiter, rate_limiter_config, RateLimiter, RateLimiterConfig};
