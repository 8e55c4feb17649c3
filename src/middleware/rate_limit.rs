use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::auth::extractors::api_key_from_parts;
use crate::error::ApiError;
use crate::state::AppState;

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after_secs: u64,
}

/// Injectable limiter seam: swappable for a distributed backend without
/// changing the call contract.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateDecision;
}

/// Sliding-log limiter: per key, an ordered list of request instants pruned
/// to the trailing window on every check.
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: usize,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            hits: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap();
        let list = hits.entry(key.to_string()).or_default();
        list.retain(|t| now.duration_since(*t) < self.window);
        list.push(now);

        if list.len() > self.max_requests {
            let oldest = list[0];
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: retry_after.as_secs().max(1),
            }
        } else {
            RateDecision {
                allowed: true,
                remaining: (self.max_requests - list.len()) as u64,
                retry_after_secs: 0,
            }
        }
    }
}

/// Middleware guarding `/api/*`: prune-append-count per identity, 429 with a
/// retry-after hint past the threshold, remaining-quota header otherwise.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = identity_key(&state, &req);
    let decision = state.limiter.check(&key);
    if !decision.allowed {
        // The key may carry credential material; log only the namespace.
        let kind = key.split(':').next().unwrap_or("unknown");
        warn!(identity = kind, "rate limit exceeded");
        return Err(ApiError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    Ok(res)
}

/// Limit key, best identity first: session-bound user, then the presented
/// API key (1:1 with its owner, no store read needed), then network origin.
fn identity_key(state: &AppState, req: &Request) -> String {
    if let Some(user_id) = state
        .sessions
        .resolve(req.headers())
        .and_then(|sid| state.sessions.user_id(&sid))
    {
        return format!("user:{user_id}");
    }
    if let Some(key) = api_key_from_parts(req.headers(), req.uri().query()) {
        return format!("key:{key}");
    }
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }
    "ip:unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_threshold() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 3);
        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("user:a");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
    }

    #[test]
    fn rejects_past_the_threshold_with_retry_hint() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 3);
        for _ in 0..3 {
            assert!(limiter.check("user:a").allowed);
        }
        let decision = limiter.check("user:a");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after_secs >= 1);
        assert!(decision.retry_after_secs <= 60);
    }

    #[test]
    fn keys_are_isolated() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check("user:a").allowed);
        assert!(!limiter.check("user:a").allowed);
        assert!(limiter.check("user:b").allowed);
    }

    #[test]
    fn window_elapse_readmits_requests() {
        let limiter = SlidingWindowLimiter::new(Duration::from_millis(50), 1);
        assert!(limiter.check("user:a").allowed);
        assert!(!limiter.check("user:a").allowed);
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("user:a").allowed);
    }
}
