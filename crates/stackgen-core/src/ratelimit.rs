//! Rate Limiting
//!
//! Sliding-window counters keyed by identity and route.

use crate::RateLimit;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window rate limiter
pub struct SlidingWindow {
    window_size: Duration,
    max_requests: u32,
    admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(window_size: Duration, max_requests: u32) -> Self {
        Self {
            window_size,
            max_requests,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    fn evict(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window_size {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn decide(&self, admitted: &VecDeque<Instant>, now: Instant) -> RateLimitResult {
        let used = admitted.len() as u32;
        let allowed = used < self.max_requests;
        let retry_after = if allowed {
            None
        } else {
            admitted
                .front()
                .map(|&oldest| self.window_size.saturating_sub(now.saturating_duration_since(oldest)))
        };

        RateLimitResult {
            allowed,
            remaining: self.max_requests.saturating_sub(used),
            limit: self.max_requests,
            retry_after,
        }
    }

    /// Evaluate without recording
    pub fn check_at(&self, now: Instant) -> RateLimitResult {
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);
        self.decide(&admitted, now)
    }

    /// Record an admission unconditionally
    pub fn record_at(&self, now: Instant) {
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);
        admitted.push_back(now);
    }

    /// True once every recorded admission has aged out
    pub fn is_idle_at(&self, now: Instant) -> bool {
        let mut admitted = self.admitted.lock();
        self.evict(&mut admitted, now);
        admitted.is_empty()
    }
}

/// Rate limit check result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    /// Whole seconds a denied caller should wait, never zero
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
            .unwrap_or(0)
            .max(1)
    }
}

/// Per-key sliding windows
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, SlidingWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window key for an identity on a route
    pub fn key(identity: &str, route_pattern: &str) -> String {
        format!("{identity}|{route_pattern}")
    }

    fn window(&self, key: &str, limit: &RateLimit) -> dashmap::mapref::one::Ref<'_, String, SlidingWindow> {
        if let Some(window) = self.windows.get(key) {
            return window;
        }
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| {
                SlidingWindow::new(Duration::from_millis(limit.window_ms), limit.max_requests)
            })
            .downgrade()
    }

    pub fn check_at(&self, key: &str, limit: &RateLimit, now: Instant) -> RateLimitResult {
        self.window(key, limit).check_at(now)
    }

    pub fn record_at(&self, key: &str, limit: &RateLimit, now: Instant) {
        self.window(key, limit).record_at(now)
    }

    /// Drop windows whose admissions have all expired
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_idle_at(now));
        before - self.windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Response headers describing the caller's budget, lowercase names
    pub fn headers(result: &RateLimitResult) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("x-ratelimit-limit", result.limit.to_string()),
            ("x-ratelimit-remaining", result.remaining.to_string()),
        ];

        if !result.allowed {
            headers.push(("retry-after", result.retry_after_secs().to_string()));
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquire(window: &SlidingWindow, now: Instant) -> RateLimitResult {
        let result = window.check_at(now);
        if result.allowed {
            window.record_at(now);
        }
        result
    }

    #[test]
    fn test_sixth_request_in_window_is_rejected() {
        let window = SlidingWindow::new(Duration::from_secs(60), 5);
        let start = Instant::now();

        for i in 0..5 {
            let result = acquire(&window, start + Duration::from_secs(i * 2));
            assert!(result.allowed, "request {i} should pass");
        }

        let sixth = acquire(&window, start + Duration::from_secs(10));
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        assert_eq!(sixth.retry_after, Some(Duration::from_secs(50)));
    }

    #[test]
    fn test_window_slides() {
        let window = SlidingWindow::new(Duration::from_millis(1000), 2);
        let start = Instant::now();

        assert!(acquire(&window, start).allowed);
        assert!(acquire(&window, start + Duration::from_millis(500)).allowed);
        assert!(!acquire(&window, start + Duration::from_millis(900)).allowed);
        // first admission has aged out
        assert!(acquire(&window, start + Duration::from_millis(1000)).allowed);
        assert!(!acquire(&window, start + Duration::from_millis(1200)).allowed);
    }

    #[test]
    fn test_check_does_not_record() {
        let window = SlidingWindow::new(Duration::from_secs(1), 1);
        let now = Instant::now();
        assert!(window.check_at(now).allowed);
        assert!(window.check_at(now).allowed);
        window.record_at(now);
        assert!(!window.check_at(now).allowed);
    }

    #[test]
    fn test_keys_are_isolated() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(60_000, 1).unwrap();
        let a = RateLimiter::key("token:a", "/public");
        let b = RateLimiter::key("token:b", "/public");

        let now = Instant::now();

        limiter.record_at(&a, &limit, now);
        assert!(!limiter.check_at(&a, &limit, now).allowed);
        let fresh = limiter.check_at(&b, &limit, now);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 1);
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_prune_drops_idle_windows() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(60_000, 3).unwrap();
        let now = Instant::now();
        limiter.check_at("idle", &limit, now);
        limiter.record_at("busy", &limit, now);

        assert_eq!(limiter.prune(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_headers() {
        let result = RateLimitResult {
            allowed: false,
            remaining: 0,
            limit: 5,
            retry_after: Some(Duration::from_millis(1500)),
        };
        let headers = RateLimiter::headers(&result);
        assert!(headers.contains(&("retry-after", "2".to_string())));
        assert!(headers.contains(&("x-ratelimit-limit", "5".to_string())));
    }
}
