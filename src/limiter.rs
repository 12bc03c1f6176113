use chrono::{NaiveDateTime, TimeDelta};

use crate::config::MIN_ACTUATION_INTERVAL_SECS;

/// Minimum spacing between two lock releases.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    last_actuation_at: Option<NaiveDateTime>,
    min_interval: TimeDelta,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_interval(TimeDelta::seconds(MIN_ACTUATION_INTERVAL_SECS))
    }

    pub fn with_interval(min_interval: TimeDelta) -> Self {
        Self {
            last_actuation_at: None,
            min_interval,
        }
    }

    /// Nothing released yet, or strictly more than `min_interval` since the
    /// last release.
    pub fn permit(&self, now: NaiveDateTime) -> bool {
        match self.last_actuation_at {
            None => true,
            Some(last) => now - last > self.min_interval,
        }
    }

    /// Call only after the lock was actually released.
    pub fn record(&mut self, now: NaiveDateTime) {
        self.last_actuation_at = Some(now);
    }

    pub fn last_actuation_at(&self) -> Option<NaiveDateTime> {
        self.last_actuation_at
    }
}
