//! Token-bucket rate limiting with two gates: a global bucket protecting the
//! service as a whole (checked first) and per-client-IP buckets created
//! lazily. A background sweeper evicts buckets idle for ten minutes so the
//! map cannot grow without bound.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::AppError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const IDLE_EVICTION: Duration = Duration::from_secs(10 * 60);

/// A token bucket: `burst` is the capacity, `rate` the refill per second.
/// Buckets start full.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            tokens: f64::from(burst),
            capacity: f64::from(burst),
            rate: f64::from(rate),
            last_refill: Instant::now(),
        }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct IpEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Which gate rejected the request; used only for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Global,
    PerIp,
}

pub struct RateLimiter {
    global: Mutex<TokenBucket>,
    per_ip: Mutex<HashMap<IpAddr, IpEntry>>,
    per_ip_rate: u32,
    per_ip_burst: u32,
}

impl RateLimiter {
    pub fn new(per_ip_rate: u32, per_ip_burst: u32, global_rate: u32, global_burst: u32) -> Self {
        Self {
            global: Mutex::new(TokenBucket::new(global_rate, global_burst)),
            per_ip: Mutex::new(HashMap::new()),
            per_ip_rate,
            per_ip_burst,
        }
    }

    /// Admits or rejects one request from `ip`. The global gate is checked
    /// first; a globally rejected request consumes no per-IP token.
    pub fn check(&self, ip: IpAddr) -> Result<(), LimitScope> {
        if !self.global.lock().expect("global bucket lock poisoned").allow() {
            return Err(LimitScope::Global);
        }

        let mut per_ip = self.per_ip.lock().expect("per-ip bucket lock poisoned");
        let entry = per_ip.entry(ip).or_insert_with(|| IpEntry {
            bucket: TokenBucket::new(self.per_ip_rate, self.per_ip_burst),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();

        if entry.bucket.allow() {
            Ok(())
        } else {
            Err(LimitScope::PerIp)
        }
    }

    /// Removes per-IP buckets that have not been touched within `idle_for`.
    /// Returns the number evicted.
    pub fn sweep(&self, idle_for: Duration) -> usize {
        let now = Instant::now();
        let mut per_ip = self.per_ip.lock().expect("per-ip bucket lock poisoned");
        let before = per_ip.len();
        per_ip.retain(|_, entry| now.saturating_duration_since(entry.last_seen) < idle_for);
        before - per_ip.len()
    }
}

/// Background task evicting idle per-IP buckets every five minutes.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = limiter.sweep(IDLE_EVICTION);
            if evicted > 0 {
                debug!(evicted, "evicted idle rate limit buckets");
            }
        }
    })
}

/// Axum middleware enforcing both gates on every request. Rejections return
/// a sanitized 429 before any handler, store, or queue work happens.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ip = client_ip(req.headers(), peer);

    match limiter.check(ip) {
        Ok(()) => next.run(req).await,
        Err(scope) => {
            warn!(
                ip = %ip,
                path = %req.uri().path(),
                method = %req.method(),
                scope = ?scope,
                "rate limit exceeded"
            );
            AppError::RateLimited.into_response()
        }
    }
}

/// Client IP resolution: first X-Forwarded-For entry, then X-Real-IP, then
/// the socket peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .and_then(|s| s.parse().ok())
        {
            return ip;
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse() {
            return ip;
        }
    }

    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_bucket_allows_burst_then_rejects() {
        let mut bucket = TokenBucket::new(2, 2);
        let now = Instant::now();
        assert!(bucket.allow_at(now));
        assert!(bucket.allow_at(now));
        assert!(!bucket.allow_at(now));
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1, 1);
        let now = Instant::now();
        assert!(bucket.allow_at(now));
        assert!(!bucket.allow_at(now));
        assert!(bucket.allow_at(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_bucket_capacity_caps_refill() {
        let mut bucket = TokenBucket::new(100, 2);
        let now = Instant::now();
        assert!(bucket.allow_at(now));
        // A long idle period refills to capacity, not beyond it.
        let later = now + Duration::from_secs(3600);
        assert!(bucket.allow_at(later));
        assert!(bucket.allow_at(later));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn test_five_rapid_requests_admit_burst_only() {
        let limiter = RateLimiter::new(2, 2, 1000, 2000);
        let outcomes: Vec<bool> = (0..5).map(|_| limiter.check(ip(1)).is_ok()).collect();
        assert_eq!(outcomes, vec![true, true, false, false, false]);
    }

    #[test]
    fn test_per_ip_buckets_are_independent() {
        let limiter = RateLimiter::new(1, 1, 1000, 2000);
        assert!(limiter.check(ip(1)).is_ok());
        assert_eq!(limiter.check(ip(1)), Err(LimitScope::PerIp));
        assert!(limiter.check(ip(2)).is_ok());
    }

    #[test]
    fn test_global_gate_checked_first() {
        let limiter = RateLimiter::new(100, 200, 0, 0);
        assert_eq!(limiter.check(ip(1)), Err(LimitScope::Global));
    }

    #[test]
    fn test_sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(10, 10, 1000, 2000);
        let _ = limiter.check(ip(1));
        let _ = limiter.check(ip(2));
        assert_eq!(limiter.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(limiter.sweep(Duration::ZERO), 2);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        let peer = "192.0.2.1:4000".parse().ok();
        assert_eq!(client_ip(&headers, peer), "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        let peer: Option<SocketAddr> = "192.0.2.1:4000".parse().ok();
        assert_eq!(
            client_ip(&headers, peer),
            "198.51.100.2".parse::<IpAddr>().unwrap()
        );

        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(
            client_ip(&headers, None),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }
}
