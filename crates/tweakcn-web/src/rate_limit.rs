//! Fixed-window rate limiting.
//!
//! Windows are aligned to multiples of the window length since the Unix
//! epoch, so every key shares the same boundaries.  The counter for a key is
//! incremented and checked under the map's shard lock, which makes
//! concurrent requests from the same address see distinct counts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::config::RateLimitConfig;

/// Result of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window ends, in Unix milliseconds.
    pub reset: i64,
}

/// Counts requests per key.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn limit(&self, key: &str) -> RateLimitDecision;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: i64,
    count: u32,
}

/// In-process fixed-window limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window_ms: i64,
    windows: DashMap<String, Window>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis().max(1) as i64,
            windows: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests, config.window)
    }

    /// Check `key` at `now_ms`.
    pub fn limit_at(&self, key: &str, now_ms: i64) -> RateLimitDecision {
        let start_ms = now_ms - now_ms.rem_euclid(self.window_ms);
        let reset = start_ms + self.window_ms;

        let mut entry = self
            .windows
            .entry(key.to_owned())
            .or_insert(Window { start_ms, count: 0 });
        if entry.start_ms != start_ms {
            *entry = Window { start_ms, count: 0 };
        }
        entry.count = entry.count.saturating_add(1);
        let count = entry.count;
        drop(entry);

        RateLimitDecision {
            success: count <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
            reset,
        }
    }

    /// Forget windows that ended before `now_ms`.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.start_ms + self.window_ms > now_ms);
        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            tracing::debug!(purged, "purged expired rate-limit windows");
        }
        purged
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms as u64)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn limit(&self, key: &str) -> RateLimitDecision {
        self.limit_at(key, Utc::now().timestamp_millis())
    }
}
