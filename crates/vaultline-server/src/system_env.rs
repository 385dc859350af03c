//! Production [`Environment`] backed by system time and the OS RNG.

use std::time::Duration;

use vaultline_core::env::Environment;

/// Environment using real clocks, tokio sleep, and getrandom.
///
/// # Panics
///
/// [`Environment::random_bytes`] panics if the OS RNG fails. A server
/// without working cryptographic randomness cannot operate securely, so
/// continuing would be worse than crashing.
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
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used, reason = "Clock before the epoch is unrecoverable")]
    fn unix_now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used, reason = "OS RNG failure is unrecoverable")]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("OS RNG failed");
    }
}
