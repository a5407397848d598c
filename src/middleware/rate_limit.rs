//! Rate limiting middleware using actix-governor.
//!
//! Each client IP gets its own token bucket.

use actix_governor::governor::middleware::NoOpMiddleware;
use actix_governor::{Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor};

/// Type alias for the rate limiter configuration.
pub type RateLimiterConfig = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Type alias for the rate limiter.
pub type RateLimiter = Governor<PeerIpKeyExtractor, NoOpMiddleware>;

/// Sustained rate: one request per second per IP.
pub const SECONDS_PER_REQUEST: u64 = 1;

/// Requests an idle client may send back to back.
pub const BURST_SIZE: u32 = 30;

/// Builds the shared limiter configuration. `None` means the builder
/// rejected the parameters.
///
/// Governor does not implement Clone, so build the configuration once and
/// wrap each worker's app with `Governor::new(&config)`.
pub fn rate_limiter_config() -> Option<RateLimiterConfig> {
    GovernorConfigBuilder::default()
        .per_second(SECONDS_PER_REQUEST)
        .burst_size(BURST_SIZE)
        .finish()
}

/// Creates the per-worker middleware from a shared configuration.
pub fn create_rate_limiter(config: &RateLimiterConfig) -> RateLimiter {
    Governor::new(config)
}
