//! Fixed-window request limits.
//!
//! Unauthenticated routes are keyed by caller IP, authenticated routes by the
//! leased domain. Exceeding the limit answers `429` with `Retry-After`.

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{error_response, AppState};

/// Buckets are swept of expired windows once the map grows past this.
const SWEEP_THRESHOLD: usize = 10_000;

/// Result of admitting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request admitted.
    Allowed {
        /// Requests left in the current window.
        remaining: u32,
    },
    /// Window exhausted.
    Limited {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-key fixed-window counter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    enabled: bool,
    buckets: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Allow `limit` requests per key every `window`.
    pub fn new(limit: u32, window: Duration, enabled: bool) -> Self {
        if !enabled {
            warn!("rate limiting disabled");
        }
        Self {
            limit,
            window,
            enabled,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count a request against `key`.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Decision {
        if !self.enabled {
            return Decision::Allowed {
                remaining: self.limit,
            };
        }

        let mut buckets = self.buckets.lock();
        if buckets.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            buckets.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = buckets.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.limit {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.started));
            return Decision::Limited { retry_after };
        }

        entry.count += 1;
        Decision::Allowed {
            remaining: self.limit - entry.count,
        }
    }
}

/// Caller IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Limit unauthenticated routes per caller IP.
pub async fn limit_by_ip(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_ip(request.headers(), peer);
    admit(&state.unauthed_limiter, &key, request, next).await
}

/// Limit authenticated routes per leased domain.
pub async fn limit_by_domain(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let key = params.get("domain").cloned().unwrap_or_default();
    admit(&state.authed_limiter, &key, request, next).await
}

async fn admit(limiter: &RateLimiter, key: &str, request: Request, next: Next) -> Response {
    match limiter.check(key) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.limit()));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        Decision::Limited { retry_after } => {
            debug!(key, retry_after_secs = retry_after.as_secs(), "rate limited");
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded".to_string(),
                None,
            )
            .into_response();
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(retry_after.as_secs().max(1)));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), true);
        let t0 = Instant::now();

        assert_eq!(limiter.check_at("a", t0), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at("a", t0), Decision::Allowed { remaining: 0 });
        assert!(matches!(
            limiter.check_at("a", t0 + Duration::from_secs(10)),
            Decision::Limited { retry_after } if retry_after == Duration::from_secs(50)
        ));

        // Keys are independent.
        assert_eq!(limiter.check_at("b", t0), Decision::Allowed { remaining: 1 });

        // A new window resets the count.
        assert_eq!(
            limiter.check_at("a", t0 + Duration::from_secs(60)),
            Decision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn test_disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), false);
        for _ in 0..10 {
            assert!(matches!(limiter.check("a"), Decision::Allowed { .. }));
        }
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "192.0.2.9:5555".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, Some(peer)), "198.51.100.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.1");
    }
}
