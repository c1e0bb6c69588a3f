//! Production environment using the tokio clock and OS randomness.
//!
//! # Capabilities
//!
//! - Monotonic time from `tokio::time::Instant`. Advances naturally, and
//!   honors tokio's paused clock in tests
//! - OS cryptographic RNG (getrandom). Truly random, not reproducible
//! - Tokio async sleep

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hearth_core::env::Environment;

/// Production environment.
///
/// # Panics
///
/// Panics if the OS RNG fails. Correlation tokens and backoff jitter must
/// not repeat across sessions, and a host without entropy cannot guarantee
/// that.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
