//! Fixed-window rate limiter keyed by action name.
//!
//! The window is shared by every agent: a busy agent can exhaust an action's
//! budget for everyone else until the window rolls over.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Length of one counting window.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: Instant,
    count: u32,
}

/// Per-action admission counter.
pub struct RateLimiter {
    limit_per_window: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter admitting `limit_per_window` calls per action per
    /// window. A limit of 0 admits nothing.
    pub fn new(limit_per_window: u32) -> Self {
        Self {
            limit_per_window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit_per_window
    }

    /// Try to admit one call for `action`. Returns true if admitted.
    pub fn admit(&self, action: &str) -> bool {
        self.admit_at(action, Instant::now())
    }

    /// Same as [`admit`](Self::admit) with an explicit clock.
    pub fn admit_at(&self, action: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(action.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
        });

        if now.saturating_duration_since(bucket.window_start) > WINDOW {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= self.limit_per_window {
            debug!(action, count = bucket.count, "Rate limit reached");
            return false;
        }

        bucket.count += 1;
        true
    }

    /// Calls admitted for `action` in its current window.
    pub fn current_count(&self, action: &str) -> u32 {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.get(action).map(|b| b.count).unwrap_or(0)
    }
}
