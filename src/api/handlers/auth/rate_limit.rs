//! Rate limiting primitives for auth flows.
//!
//! `WindowRateLimiter` keeps a rolling window of attempt timestamps per
//! `(action, ip)` and `(action, key)` pair in memory:
//! 30 per IP and 10 per key (email or verification id) within 10 minutes.
//! Limits are per process; a restart clears them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const ATTEMPT_WINDOW: Duration = Duration::from_secs(10 * 60);
const IP_ATTEMPT_LIMIT: usize = 30;
const KEY_ATTEMPT_LIMIT: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    VerifyOtp,
    ResendOtp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_key(&self, key: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_key(&self, _key: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Scope {
    Ip,
    Key,
}

type Bucket = (Scope, RateLimitAction, String);

#[derive(Debug)]
pub struct WindowRateLimiter {
    window: Duration,
    ip_limit: usize,
    key_limit: usize,
    attempts: Mutex<HashMap<Bucket, VecDeque<Instant>>>,
}

impl WindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(ATTEMPT_WINDOW, IP_ATTEMPT_LIMIT, KEY_ATTEMPT_LIMIT)
    }

    #[must_use]
    pub fn with_limits(window: Duration, ip_limit: usize, key_limit: usize) -> Self {
        Self {
            window,
            ip_limit,
            key_limit,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, bucket: Bucket, limit: usize) -> RateLimitDecision {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop buckets whose newest attempt fell out of the window.
        attempts.retain(|_, times| {
            times
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });

        let times = attempts.entry(bucket).or_default();
        while times
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            times.pop_front();
        }

        if times.len() >= limit {
            return RateLimitDecision::Limited;
        }
        times.push_back(now);
        RateLimitDecision::Allowed
    }
}

impl Default for WindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Requests without a client address are only limited per key.
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        self.record((Scope::Ip, action, ip.to_string()), self.ip_limit)
    }

    fn check_key(&self, key: &str, action: RateLimitAction) -> RateLimitDecision {
        self.record((Scope::Key, action, key.to_string()), self.key_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_key("user@example.com", RateLimitAction::VerifyOtp),
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_limits_per_key_and_action() {
        let limiter = WindowRateLimiter::with_limits(Duration::from_secs(60), 5, 2);

        assert_eq!(
            limiter.check_key("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_key("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_key("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Limited
        );

        // Other keys and other actions have their own budget.
        assert_eq!(
            limiter.check_key("bob@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_key("alice@example.com", RateLimitAction::ResendOtp),
            RateLimitDecision::Allowed
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            limiter.check_key("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_limits_per_ip() {
        let limiter = WindowRateLimiter::with_limits(Duration::from_secs(60), 3, 10);
        for _ in 0..3 {
            assert_eq!(
                limiter.check_ip(Some("10.0.0.1"), RateLimitAction::VerifyOtp),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_ip(Some("10.0.0.1"), RateLimitAction::VerifyOtp),
            RateLimitDecision::Limited
        );
        assert_eq!(
            limiter.check_ip(Some("10.0.0.2"), RateLimitAction::VerifyOtp),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::VerifyOtp),
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn limited_attempts_do_not_extend_the_window() {
        let limiter = WindowRateLimiter::with_limits(Duration::from_secs(60), 5, 1);
        assert_eq!(
            limiter.check_key("id", RateLimitAction::ResendOtp),
            RateLimitDecision::Allowed
        );
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            limiter.check_key("id", RateLimitAction::ResendOtp),
            RateLimitDecision::Limited
        );
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(
            limiter.check_key("id", RateLimitAction::ResendOtp),
            RateLimitDecision::Allowed
        );
    }
}
