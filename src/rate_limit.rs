//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing on login and account spam on registration.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

use crate::api::ApiError;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for credential endpoints.
pub struct RateLimitConfig {
    pub credentials: IpLimiter,
}

impl RateLimitConfig {
    /// Allow `per_minute` login/register attempts per IP, all of them as a burst.
    pub fn per_minute(per_minute: NonZeroU32) -> Self {
        Self {
            credentials: RateLimiter::keyed(Quota::per_minute(per_minute)),
        }
    }
}

/// Client IP from the connection, or a shared bucket when it is unknown
/// (e.g. a router driven without `ConnectInfo`).
fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware for rate limiting login and registration.
pub async fn rate_limit_credentials(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);

    match config.credentials.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, "Credential rate limit exceeded");
            ApiError::too_many_requests("Too many attempts. Please wait before trying again.")
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_is_per_key() {
        let config = RateLimitConfig::per_minute(NonZeroU32::new(2).unwrap());

        assert!(config.credentials.check_key(&"1.1.1.1".to_string()).is_ok());
        assert!(config.credentials.check_key(&"1.1.1.1".to_string()).is_ok());
        assert!(config.credentials.check_key(&"1.1.1.1".to_string()).is_err());
        assert!(config.credentials.check_key(&"2.2.2.2".to_string()).is_ok());
    }
}
