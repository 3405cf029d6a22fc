//! Sliding-window flood control for chat messages.
//!
//! Timestamps come from the room's [`Clock`] so tests can move time by hand.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use crate::clock::Clock;

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum actions allowed in the time window.
    pub max_actions: u32,
    /// Time window for counting actions.
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit configuration.
    pub fn new(max_actions: u32, window_secs: u64) -> Self {
        Self {
            max_actions,
            window: Duration::from_secs(window_secs),
        }
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10, 10)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Action is allowed.
    Allowed,
    /// Action is denied due to rate limit.
    Denied {
        /// Time until the oldest action leaves the window.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the action is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Per-identity action limiter.
#[derive(Debug)]
pub struct ActionRateLimiter {
    config: RateLimitConfig,
    /// Action timestamps per identity, oldest first.
    actions: RwLock<HashMap<String, VecDeque<i64>>>,
}

impl ActionRateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            actions: RwLock::new(HashMap::new()),
        }
    }

    /// Check and record in one operation.
    ///
    /// Returns `Allowed` and records the action, or returns `Denied` without recording.
    pub fn check_and_record(&self, identity: &str, clock: &dyn Clock) -> RateLimitResult {
        let now = clock.now_millis();
        let window = self.config.window_millis();
        let mut actions = self
            .actions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamps = actions.entry(identity.to_string()).or_default();

        while stamps.front().is_some_and(|&t| t <= now - window) {
            stamps.pop_front();
        }

        if stamps.len() >= self.config.max_actions as usize {
            let oldest = stamps.front().copied().unwrap_or(now);
            let wait = (oldest + window - now).max(0);
            return RateLimitResult::Denied {
                retry_after: Duration::from_millis(wait as u64),
            };
        }

        stamps.push_back(now);
        RateLimitResult::Allowed
    }

    /// Number of actions the identity may still take in the current window.
    pub fn remaining(&self, identity: &str, clock: &dyn Clock) -> u32 {
        let now = clock.now_millis();
        let window = self.config.window_millis();
        let actions = self
            .actions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let used = actions
            .get(identity)
            .map(|stamps| stamps.iter().filter(|&&t| t > now - window).count())
            .unwrap_or(0);
        self.config.max_actions.saturating_sub(used as u32)
    }

    /// Drop timestamps that left the window, and identities with none left.
    ///
    /// Identities still inside their window are kept, so reconnecting does
    /// not reset flood control.
    pub fn cleanup(&self, clock: &dyn Clock) {
        let cutoff = clock.now_millis() - self.config.window_millis();
        let mut actions = self
            .actions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for stamps in actions.values_mut() {
            stamps.retain(|&t| t > cutoff);
        }
        actions.retain(|_, stamps| !stamps.is_empty());
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.actions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
