//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down
//! password guessing and signup spam.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_MIN: NonZeroU32 = NonZeroU32::new(10).unwrap();
const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Login: 10 requests per minute per IP
    pub login: Arc<IpLimiter>,
    /// Register: 5 requests per minute per IP
    pub register: Arc<IpLimiter>,
    /// Key clients by `X-Forwarded-For` instead of the peer address
    pub trust_proxy: bool,
}

impl RateLimitConfig {
    pub fn new(trust_proxy: bool) -> Self {
        Self::with_quotas(
            Quota::per_minute(LOGIN_PER_MIN),
            Quota::per_minute(REGISTER_PER_MIN),
            trust_proxy,
        )
    }

    pub fn with_quotas(login: Quota, register: Quota, trust_proxy: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(login)),
            register: Arc::new(RateLimiter::keyed(register)),
            trust_proxy,
        }
    }

    /// Drop per-client state for clients whose buckets have fully refilled.
    pub fn retain_recent(&self) {
        for limiter in [&self.login, &self.register] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("trust_proxy", &self.trust_proxy)
            .finish_non_exhaustive()
    }
}

fn check(limiter: &IpLimiter, ip: String, message: &'static str) -> Result<(), Response> {
    limiter.check_key(&ip).map_err(|_| {
        warn!(client = %ip, "Rate limit exceeded");
        (StatusCode::TOO_MANY_REQUESTS, message).into_response()
    })
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, config.trust_proxy);
    match check(
        &config.login,
        ip,
        "Too many login attempts. Please wait before trying again.",
    ) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, config.trust_proxy);
    match check(
        &config.register,
        ip,
        "Too many signup attempts. Please wait before trying again.",
    ) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}
