use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

type TierMap = DashMap<Tier, (RateLimitConfig, DashMap<IpAddr, Vec<Instant>>)>;

/// Route groups with their own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Salon listings and free slots, no auth.
    Public,
    /// Registration and customer reads.
    Auth,
    /// Booking creation.
    Booking,
    /// Salon management by owners.
    Owner,
    /// Platform admin.
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Public, Tier::Auth, Tier::Booking, Tier::Owner, Tier::Admin];

    pub fn default_config(self) -> RateLimitConfig {
        let (max_requests, secs) = match self {
            Tier::Public => (60, 60),
            Tier::Auth => (30, 60),
            Tier::Booking => (5, 300),
            Tier::Owner => (120, 60),
            Tier::Admin => (120, 60),
        };
        RateLimitConfig {
            max_requests,
            window: Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed within the sliding window.
    pub max_requests: u32,
    pub window: Duration,
}

/// In-memory per-IP rate limiter using sliding window counters.
///
/// Each tier has its own config and tracking map. Keys are client IP
/// addresses; values are the timestamps of recent requests.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<TierMap>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    /// Limiter with every tier at its default budget.
    pub fn with_defaults() -> Self {
        let limiter = Self::new();
        for tier in Tier::ALL {
            limiter.add_tier(tier, tier.default_config());
        }
        limiter
    }

    pub fn add_tier(&self, tier: Tier, config: RateLimitConfig) {
        self.tiers.insert(tier, (config, DashMap::new()));
    }

    /// Check if a request from `ip` is allowed under the given tier.
    ///
    /// Returns `Err(retry_after_secs)` if rate limited. Tiers that were
    /// never configured are unlimited.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let Some(tier_entry) = self.tiers.get(&tier) else {
            return Ok(());
        };
        let (config, ip_map) = tier_entry.value();
        let now = Instant::now();

        let mut entry = ip_map.entry(ip).or_default();
        entry.retain(|t| now.duration_since(*t) < config.window);

        if entry.len() >= config.max_requests as usize {
            // Time until the oldest request leaves the window
            let oldest = entry[0];
            let retry_after = (oldest + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }

    /// Remove entries older than 2× window from all tiers.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for tier_entry in self.tiers.iter() {
            let (config, ip_map) = tier_entry.value();
            let cutoff = config.window * 2;
            ip_map.retain(|_ip, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < cutoff);
                !timestamps.is_empty()
            });
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Client IP from X-Forwarded-For (reverse proxy) or ConnectInfo.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first_ip) = forwarded.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

/// Middleware for one route group; state is the shared limiter plus the
/// group's tier.
pub async fn rate_limit(
    State((limiter, tier)): State<(RateLimiter, Tier)>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check(tier, ip).map_err(|retry_after| {
        tracing::debug!(%ip, ?tier, retry_after, "rate limited");
        too_many_requests(retry_after)
    })?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn limiter(tier: Tier, max_requests: u32, window: Duration) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.add_tier(tier, RateLimitConfig { max_requests, window });
        limiter
    }

    #[test]
    fn test_rejects_over_limit() {
        let limiter = limiter(Tier::Booking, 2, Duration::from_secs(60));
        let ip = test_ip(1);
        assert!(limiter.check(Tier::Booking, ip).is_ok());
        assert!(limiter.check(Tier::Booking, ip).is_ok());
        assert!(limiter.check(Tier::Booking, ip).is_err());
    }

    #[test]
    fn test_returns_retry_after() {
        let limiter = limiter(Tier::Auth, 1, Duration::from_secs(60));
        let ip = test_ip(1);
        limiter.check(Tier::Auth, ip).unwrap();
        let retry_after = limiter.check(Tier::Auth, ip).unwrap_err();
        assert!((1..=60).contains(&retry_after));
    }

    #[test]
    fn test_ips_and_tiers_independent() {
        let limiter = limiter(Tier::Public, 1, Duration::from_secs(60));
        limiter.add_tier(
            Tier::Owner,
            RateLimitConfig {
                max_requests: 1,
                window: Duration::from_secs(60),
            },
        );
        assert!(limiter.check(Tier::Public, test_ip(1)).is_ok());
        assert!(limiter.check(Tier::Public, test_ip(1)).is_err());
        assert!(limiter.check(Tier::Public, test_ip(2)).is_ok());
        assert!(limiter.check(Tier::Owner, test_ip(1)).is_ok());
    }

    #[test]
    fn test_unconfigured_tier_is_unlimited() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.check(Tier::Admin, test_ip(1)).is_ok());
        }
    }

    #[test]
    fn test_booking_is_strictest_default() {
        let booking = Tier::Booking.default_config();
        assert!(Tier::ALL
            .iter()
            .all(|t| t.default_config().max_requests >= booking.max_requests));
    }

    #[test]
    fn test_window_expiry_allows_again() {
        let limiter = limiter(Tier::Public, 1, Duration::from_millis(100));
        let ip = test_ip(1);
        assert!(limiter.check(Tier::Public, ip).is_ok());
        assert!(limiter.check(Tier::Public, ip).is_err());

        sleep(Duration::from_millis(150));

        assert!(limiter.check(Tier::Public, ip).is_ok());
    }

    #[test]
    fn test_cleanup_preserves_active_entries() {
        let limiter = limiter(Tier::Owner, 2, Duration::from_secs(60));
        let ip = test_ip(1);
        limiter.check(Tier::Owner, ip).unwrap();

        limiter.cleanup();

        limiter.check(Tier::Owner, ip).unwrap();
        assert!(limiter.check(Tier::Owner, ip).is_err());
    }
}
