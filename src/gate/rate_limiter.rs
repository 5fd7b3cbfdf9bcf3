//! Per-user sliding-log rate limiting.
//!
//! Each user owns one log of admission instants per configured limit. A check
//! prunes expired entries, and only records the new instant when every limit
//! still has room, so denied requests never consume budget.

use crate::config::{LimitConfig, RateLimitSection};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { reason: String },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Limit {
    max: usize,
    window: Duration,
}

#[derive(Debug)]
struct UserWindows {
    logs: Vec<VecDeque<Instant>>,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    limits: Vec<Limit>,
    max_tracked_users: usize,
    users: Mutex<HashMap<String, UserWindows>>,
}

impl RateLimiter {
    pub fn from_section(section: &RateLimitSection) -> Self {
        if !section.enabled {
            debug!("Rate limiting disabled");
            return Self::new(&[], section.max_tracked_users);
        }
        Self::new(&section.limits, section.max_tracked_users)
    }

    /// Invalid limits (non-positive count or zero window) are dropped.
    pub fn new(limits: &[LimitConfig], max_tracked_users: usize) -> Self {
        let limits = limits
            .iter()
            .filter_map(|limit| {
                if limit.max_requests <= 0 || limit.window.is_zero() {
                    warn!(
                        "⚠️  Ignoring rate limit {} per {:?}: count and window must be positive",
                        limit.max_requests, limit.window
                    );
                    return None;
                }
                Some(Limit {
                    max: usize::try_from(limit.max_requests).unwrap_or(usize::MAX),
                    window: limit.window,
                })
            })
            .collect();

        Self {
            limits,
            max_tracked_users: max_tracked_users.max(1),
            users: Mutex::new(HashMap::new()),
        }
    }

    /// True when no limit is active and every check is allowed.
    pub fn is_unlimited(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn check(&self, user: &str) -> RateDecision {
        self.check_at(user, Instant::now())
    }

    pub fn check_at(&self, user: &str, now: Instant) -> RateDecision {
        if self.limits.is_empty() {
            return RateDecision::Allow;
        }

        let mut users = self.lock();
        if !users.contains_key(user) && users.len() >= self.max_tracked_users {
            evict_least_recent(&mut users);
        }

        let windows = users.entry(user.to_string()).or_insert_with(|| UserWindows {
            logs: vec![VecDeque::new(); self.limits.len()],
            last_seen: now,
        });
        windows.last_seen = now;

        for (limit, log) in self.limits.iter().zip(windows.logs.iter_mut()) {
            while let Some(&front) = log.front() {
                if now.saturating_duration_since(front) >= limit.window {
                    log.pop_front();
                } else {
                    break;
                }
            }
        }

        for (limit, log) in self.limits.iter().zip(windows.logs.iter()) {
            if log.len() >= limit.max {
                let reason = format!("at most {} requests per {}", limit.max, describe_window(limit.window));
                debug!("🚫 Rate limit hit for {}: {}", user, reason);
                return RateDecision::Deny { reason };
            }
        }

        for log in windows.logs.iter_mut() {
            log.push_back(now);
        }
        RateDecision::Allow
    }

    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserWindows>> {
        // A panic while holding the lock cannot leave a log half-updated
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn evict_least_recent(users: &mut HashMap<String, UserWindows>) {
    let oldest = users
        .iter()
        .min_by_key(|(_, windows)| windows.last_seen)
        .map(|(user, _)| user.clone());
    if let Some(user) = oldest {
        debug!("Evicting rate limit state for {}", user);
        users.remove(&user);
    }
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    if secs == 0 {
        format!("{}ms", window.as_millis())
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limit(max_requests: i64, secs: u64) -> LimitConfig {
        LimitConfig {
            max_requests,
            window: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_third_request_in_window_is_denied() {
        let limiter = RateLimiter::new(&[limit(2, 60)], 100);
        let t0 = Instant::now();

        assert!(limiter.check_at("u1", t0).is_allowed());
        assert!(limiter.check_at("u1", t0 + Duration::from_secs(1)).is_allowed());
        match limiter.check_at("u1", t0 + Duration::from_secs(2)) {
            RateDecision::Deny { reason } => assert_eq!(reason, "at most 2 requests per 1m"),
            RateDecision::Allow => panic!("third request should be denied"),
        }
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new(&[limit(1, 60)], 100);
        let t0 = Instant::now();
        assert!(limiter.check_at("u1", t0).is_allowed());
        assert!(limiter.check_at("u2", t0).is_allowed());
        assert!(!limiter.check_at("u1", t0).is_allowed());
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(&[limit(2, 60)], 100);
        let t0 = Instant::now();
        assert!(limiter.check_at("u1", t0).is_allowed());
        assert!(limiter.check_at("u1", t0 + Duration::from_secs(30)).is_allowed());
        assert!(!limiter.check_at("u1", t0 + Duration::from_secs(59)).is_allowed());
        // First admission has aged out, the second has not
        assert!(limiter.check_at("u1", t0 + Duration::from_secs(60)).is_allowed());
        assert!(!limiter.check_at("u1", t0 + Duration::from_secs(61)).is_allowed());
    }

    #[test]
    fn test_denied_checks_do_not_consume_budget() {
        let limiter = RateLimiter::new(&[limit(1, 10)], 100);
        let t0 = Instant::now();
        assert!(limiter.check_at("u1", t0).is_allowed());
        for i in 1..10 {
            assert!(!limiter.check_at("u1", t0 + Duration::from_secs(i)).is_allowed());
        }
        assert!(limiter.check_at("u1", t0 + Duration::from_secs(10)).is_allowed());
    }

    #[test]
    fn test_every_limit_applies_independently() {
        let limiter = RateLimiter::new(&[limit(2, 1), limit(3, 3600)], 100);
        let t0 = Instant::now();
        assert!(limiter.check_at("u1", t0).is_allowed());
        assert!(limiter.check_at("u1", t0).is_allowed());
        assert!(!limiter.check_at("u1", t0).is_allowed());
        assert!(limiter.check_at("u1", t0 + Duration::from_secs(2)).is_allowed());
        match limiter.check_at("u1", t0 + Duration::from_secs(5)) {
            RateDecision::Deny { reason } => assert!(reason.contains("per 1h")),
            RateDecision::Allow => panic!("hourly limit should apply"),
        }
    }

    #[test]
    fn test_invalid_limits_are_dropped() {
        let limiter = RateLimiter::new(&[limit(0, 60), limit(-3, 60), limit(5, 0)], 100);
        assert!(limiter.is_unlimited());
        for _ in 0..100 {
            assert!(limiter.check("u1").is_allowed());
        }
        assert_eq!(limiter.tracked_users(), 0);
    }

    #[test]
    fn test_disabled_section_always_allows() {
        let section = RateLimitSection {
            enabled: false,
            ..Default::default()
        };
        let limiter = RateLimiter::from_section(&section);
        assert!(limiter.is_unlimited());
    }

    #[test]
    fn test_least_recently_seen_user_is_evicted() {
        let limiter = RateLimiter::new(&[limit(1, 60)], 2);
        let t0 = Instant::now();
        assert!(limiter.check_at("a", t0).is_allowed());
        assert!(limiter.check_at("b", t0 + Duration::from_secs(1)).is_allowed());
        assert!(limiter.check_at("c", t0 + Duration::from_secs(2)).is_allowed());
        assert_eq!(limiter.tracked_users(), 2);
        // "a" was evicted, so it starts over with a fresh window
        assert!(limiter.check_at("a", t0 + Duration::from_secs(3)).is_allowed());
        assert!(!limiter.check_at("c", t0 + Duration::from_secs(4)).is_allowed());
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_max() {
        let limiter = Arc::new(RateLimiter::new(&[limit(10, 60)], 100));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.check("shared").is_allowed())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 10);
    }
}
