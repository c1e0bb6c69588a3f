//! Simulation environment with a virtual clock and seeded RNG.
//!
//! Time only moves when the test calls [`SimEnv::advance`] (or awaits
//! [`Environment::sleep`], which advances immediately). Randomness comes from
//! a ChaCha generator, so a seed reproduces a run exactly.

use std::{
    ops::{Add, Sub},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use hearth_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall clock at simulation start (2023-11-14T22:13:20Z).
pub const SIM_EPOCH_MS: u64 = 1_700_000_000_000;

/// Point on the virtual clock, measured from simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since simulation start.
    pub fn elapsed_since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    /// Saturates at zero, like `std::time::Instant`.
    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

struct Inner {
    now: SimInstant,
    rng: ChaCha8Rng,
}

/// Deterministic [`Environment`].
///
/// Clones share the same clock and RNG, so every component in a simulated
/// world observes one timeline.
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("now", &self.now()).finish_non_exhaustive()
    }
}

impl SimEnv {
    /// Create an environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create an environment with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        let inner = Inner { now: SimInstant::default(), rng: ChaCha8Rng::seed_from_u64(seed) };
        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.lock();
        inner.now = inner.now + by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        self.lock().now
    }

    fn wall_clock_millis(&self) -> u64 {
        SIM_EPOCH_MS + self.now().elapsed_since_start().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_moves_only_when_advanced() {
        let env = SimEnv::new();
        let start = env.now();

        assert_eq!(env.now(), start);
        env.advance(Duration::from_millis(1500));
        assert_eq!(env.now() - start, Duration::from_millis(1500));
        assert_eq!(env.wall_clock_millis(), SIM_EPOCH_MS + 1500);
    }

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::new();
        let other = env.clone();

        other.advance(Duration::from_secs(3));

        assert_eq!(env.now().elapsed_since_start(), Duration::from_secs(3));
    }

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);

        assert_eq!(a.random_u64(), b.random_u64());
        assert_ne!(SimEnv::with_seed(8).random_u64(), SimEnv::with_seed(7).random_u64());
    }

    #[test]
    fn instant_subtraction_saturates() {
        let earlier = SimInstant::default();
        let later = earlier + Duration::from_secs(1);

        assert_eq!(earlier - later, Duration::ZERO);
    }
}
