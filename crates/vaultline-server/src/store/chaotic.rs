//! Chaotic cache wrapper for fault injection testing.
//!
//! Wraps a [`ReplayCache`] and randomly fails operations to verify that the
//! ReplayGuard degrades to its in-process fallback instead of propagating
//! infrastructure errors into message delivery.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use super::{CacheError, ReplayCache};

/// Simple deterministic RNG for chaos injection.
///
/// Linear congruential generator: fast, and reproducible with the same seed
/// so chaos tests can be replayed.
#[derive(Debug)]
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0).
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

/// Cache wrapper that randomly injects `CacheError::Unavailable`.
///
/// Delegates to the underlying cache otherwise. `Clone` shares the RNG
/// state so failure sequencing stays deterministic across clones.
#[derive(Debug, Clone)]
pub struct ChaoticCache<C: ReplayCache> {
    inner: C,
    /// Failure rate (0.0 = never fail, 1.0 = always fail).
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
}

impl<C: ReplayCache> ChaoticCache<C> {
    /// Create a chaotic wrapper with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn new(inner: C, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn with_seed(inner: C, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self { inner, failure_rate, rng: Arc::new(Mutex::new(ChaoticRng::new(seed))) }
    }

    /// Underlying cache (for checking invariants after chaos).
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate)
    }
}

impl<C: ReplayCache> ReplayCache for ChaoticCache<C> {
    fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        if self.should_fail() {
            return Err(CacheError::Unavailable("injected failure".to_owned()));
        }
        self.inner.set_if_absent(key, ttl)
    }
}
