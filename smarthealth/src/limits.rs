//! Per-client fixed-window rate limiting.
//!
//! Two limiters sit in front of the router: `auth` wraps `/auth/*` and `global` wraps every
//! route. Clients are keyed by their forwarded or socket IP. Windows live in process memory and
//! are not shared between replicas.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::{
    AppState,
    audit::client_ip,
    config::{RateLimitConfig, RateLimitsConfig},
    errors::{Error, Result},
};

/// Tracked clients before stale windows are swept
const SWEEP_THRESHOLD: usize = 10_000;

/// Container for all rate limiters. `None` means the limiter is disabled.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    pub auth: Option<Arc<RateLimiter>>,
    pub global: Option<Arc<RateLimiter>>,
}

impl Limiters {
    pub fn new(config: &RateLimitsConfig) -> Self {
        Self {
            auth: RateLimiter::new(&config.auth, "Too many requests, please try again later.").map(Arc::new),
            global: RateLimiter::new(&config.global, "Too many requests, slow down.").map(Arc::new),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    message: &'static str,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// Returns `None` when `max_requests` is 0
    pub fn new(config: &RateLimitConfig, message: &'static str) -> Option<Self> {
        if config.max_requests == 0 {
            return None;
        }
        Some(Self {
            max_requests: config.max_requests,
            window: config.window,
            message,
            windows: DashMap::new(),
        })
    }

    pub fn check(&self, client: &str) -> Result<()> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Result<()> {
        if self.windows.len() > SWEEP_THRESHOLD {
            self.windows.retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let mut entry = self.windows.entry(client.to_string()).or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }

        if entry.count >= self.max_requests {
            return Err(Error::TooManyRequests {
                message: self.message.to_string(),
            });
        }
        entry.count += 1;
        Ok(())
    }
}

fn client_key(request: &Request) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_ip(request.headers(), peer)
}

pub async fn global_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    if let Some(limiter) = &state.limiters.global {
        limiter.check(&client_key(&request))?;
    }
    Ok(next.run(request).await)
}

pub async fn auth_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    if let Some(limiter) = &state.limiters.auth {
        limiter.check(&client_key(&request))?;
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig { max_requests, window }, "slow down").unwrap()
    }

    #[test]
    fn test_zero_disables() {
        let config = RateLimitConfig {
            max_requests: 0,
            window: Duration::from_secs(60),
        };
        assert!(RateLimiter::new(&config, "x").is_none());
    }

    #[test]
    fn test_limit_per_client_and_window() {
        let limiter = limiter(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("a", start).is_ok());
        assert!(limiter.check_at("a", start).is_ok());
        let err = limiter.check_at("a", start).unwrap_err();
        assert!(matches!(err, Error::TooManyRequests { ref message } if message == "slow down"));

        // Other clients have their own budget
        assert!(limiter.check_at("b", start).is_ok());

        // A new window resets the count
        assert!(limiter.check_at("a", start + Duration::from_secs(61)).is_ok());
    }
}
