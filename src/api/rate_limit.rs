//! Per-IP rate limiting for public write endpoints.
//!
//! Login, account registration, registration submission and the contact
//! form share one token bucket per client IP. Buckets refill gradually over
//! the configured window.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::{ApiError, ErrorCode};
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    tokens: u32,
    window_start: Instant,
    last_request: Instant,
}

impl RateLimitEntry {
    fn new(max_tokens: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: max_tokens,
            window_start: now,
            last_request: now,
        }
    }
}

/// Thread-safe rate limiter using dashmap
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<IpAddr, RateLimitEntry>,
    config: RateLimitConfig,
    window_duration: Duration,
}

/// Information about rate limit status
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window_duration: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    pub fn limit(&self) -> u32 {
        self.config.public_requests_per_window
    }

    /// Consume a token for `ip`.
    /// Returns `Err(retry_after_seconds)` when the bucket is empty.
    pub fn check(&self, ip: IpAddr) -> Result<RateLimitInfo, u64> {
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_after: 0,
            });
        }

        let max_tokens = self.limit();
        let now = Instant::now();

        let mut entry = self
            .entries
            .entry(ip)
            .or_insert_with(|| RateLimitEntry::new(max_tokens));

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window_duration {
            entry.tokens = max_tokens;
            entry.window_start = now;
        } else {
            // Sliding refill proportional to time since the last request
            let since_last = now.duration_since(entry.last_request);
            let replenish_rate = max_tokens as f64 / self.window_duration.as_secs_f64();
            let replenished = (since_last.as_secs_f64() * replenish_rate) as u32;
            entry.tokens = entry.tokens.saturating_add(replenished).min(max_tokens);
        }

        entry.last_request = now;
        let reset_after = self
            .window_duration
            .saturating_sub(now.duration_since(entry.window_start))
            .as_secs();

        if entry.tokens > 0 {
            entry.tokens -= 1;
            Ok(RateLimitInfo {
                remaining: entry.tokens,
                limit: max_tokens,
                reset_after,
            })
        } else {
            Err(reset_after.max(1))
        }
    }

    /// Drop buckets idle for more than two windows
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window_duration * 2;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Whether `ip` matches one of the configured proxies (single IPs or CIDR
/// networks)
fn is_trusted_proxy(ip: IpAddr, trusted_proxies: &[String]) -> bool {
    trusted_proxies.iter().any(|proxy| {
        if let Ok(network) = proxy.parse::<IpNet>() {
            return network.contains(&ip);
        }
        proxy.parse::<IpAddr>().is_ok_and(|proxy_ip| proxy_ip == ip)
    })
}

/// Client IP for rate limiting.
///
/// Forwarding headers are only honoured when the connecting peer is a
/// trusted proxy; otherwise the peer address is used. Loopback is the last
/// resort when no connection info is available.
fn extract_client_ip(request: &Request<Body>, trusted_proxies: &[String]) -> IpAddr {
    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if peer_ip.is_some_and(|ip| is_trusted_proxy(ip, trusted_proxies)) {
        if let Some(ip) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }

        if let Some(ip) = request
            .headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }

    peer_ip.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Middleware for the public write endpoints
pub async fn rate_limit_public(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, &state.config.server.trusted_proxies);

    match state.rate_limiter.check(ip) {
        Ok(info) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", info.limit.into());
            headers.insert("X-RateLimit-Remaining", info.remaining.into());
            headers.insert("X-RateLimit-Reset", info.reset_after.into());
            response
        }
        Err(retry_after) => {
            tracing::warn!(ip = %ip, "Rate limit exceeded");
            let mut response = ApiError::new(
                ErrorCode::TooManyRequests,
                format!("Too many requests. Try again in {} seconds.", retry_after),
            )
            .into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", retry_after.into());
            headers.insert("X-RateLimit-Limit", state.rate_limiter.limit().into());
            headers.insert("X-RateLimit-Remaining", 0u32.into());
            response
        }
    }
}

/// Spawn a background task to periodically clean up expired entries
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} entries remaining",
                rate_limiter.entry_count()
            );
        }
    });
}
