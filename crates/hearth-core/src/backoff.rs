//! Reconnect backoff.
//!
//! Delays grow as `base * 2^attempt` up to `cap`. Each delay is jittered
//! within its upper half ("equal jitter") so clients that lost the server at
//! the same moment do not come back at the same moment. Attempts are
//! unbounded; the caller decides when to stop.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base: DEFAULT_BASE_DELAY, cap: DEFAULT_MAX_DELAY }
    }
}

/// Capped exponential backoff with equal jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff at attempt zero.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the current attempt.
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.config.base.saturating_mul(factor).min(self.config.cap)
    }

    /// Delay before the next retry, advancing the attempt counter.
    ///
    /// `random` is any uniformly distributed value; the result always lies in
    /// `[ceiling / 2, ceiling]`.
    pub fn next_delay(&mut self, random: u64) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let half = ceiling / 2;
        let spread_ms = (ceiling - half).as_millis() as u64;
        let jitter = if spread_ms == 0 { 0 } else { random % (spread_ms + 1) };

        half + Duration::from_millis(jitter)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
