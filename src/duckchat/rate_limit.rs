use std::collections::VecDeque;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

pub const MINUTE_WINDOW_MS: u64 = 60_000;
pub const HOUR_WINDOW_MS: u64 = 3_600_000;

/// Sliding-window admission control over the last minute and the last hour.
///
/// Timestamps are milliseconds on a monotonic clock (see [`AdmissionClock`]).
/// Windows are pruned lazily: every check first drops entries that fell out of
/// their horizon.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub max_per_minute: usize,
    pub max_per_hour: usize,
    minute_window: VecDeque<u64>,
    hour_window: VecDeque<u64>,
}

impl RateLimitPolicy {
    pub fn new(enabled: bool, max_per_minute: usize, max_per_hour: usize) -> Self {
        Self {
            enabled,
            max_per_minute,
            max_per_hour,
            minute_window: VecDeque::with_capacity(max_per_minute.min(1024)),
            hour_window: VecDeque::with_capacity(max_per_hour.min(1024)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, usize::MAX, usize::MAX)
    }

    fn prune(&mut self, now: u64) {
        // Entries are pushed in time order, so the oldest sit at the front.
        while self
            .minute_window
            .front()
            .is_some_and(|&t| t.saturating_add(MINUTE_WINDOW_MS) <= now)
        {
            self.minute_window.pop_front();
        }
        while self
            .hour_window
            .front()
            .is_some_and(|&t| t.saturating_add(HOUR_WINDOW_MS) <= now)
        {
            self.hour_window.pop_front();
        }
    }

    pub fn can_admit(&mut self, now: u64) -> bool {
        if !self.enabled {
            return true;
        }

        self.prune(now);
        self.minute_window.len() < self.max_per_minute && self.hour_window.len() < self.max_per_hour
    }

    /// Account for one attempted send at `now`.
    ///
    /// Window lengths are clamped to their caps, so a caller that records without
    /// an admitted check never grows a window past its limit.
    pub fn record(&mut self, now: u64) {
        if !self.enabled {
            return;
        }

        self.prune(now);
        self.minute_window.push_back(now);
        self.hour_window.push_back(now);

        while self.minute_window.len() > self.max_per_minute {
            self.minute_window.pop_front();
        }
        while self.hour_window.len() > self.max_per_hour {
            self.hour_window.pop_front();
        }
    }

    /// Milliseconds until the oldest minute-window entry expires, or 0 when a
    /// request can be admitted now. Only the minute window is considered.
    pub fn wait_ms(&mut self, now: u64) -> u64 {
        if self.can_admit(now) {
            return 0;
        }

        self.minute_window
            .front()
            .map(|&oldest| (oldest + MINUTE_WINDOW_MS).saturating_sub(now))
            .unwrap_or(0)
    }

    pub fn minute_count(&self) -> usize {
        self.minute_window.len()
    }

    pub fn hour_count(&self) -> usize {
        self.hour_window.len()
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self::new(config.enabled, config.max_per_minute, config.max_per_hour)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

/// Monotonic millisecond clock for the admission windows.
///
/// Runs on tokio's clock, so it advances with `tokio::time::sleep` and with
/// paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionClock {
    origin: Instant,
}

impl AdmissionClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since the clock was created.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for AdmissionClock {
    fn default() -> Self {
        Self::new()
    }
}
