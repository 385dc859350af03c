//! Replay guard: at-most-once admission of ciphertext per channel.
//!
//! The server cannot read message contents, so replay detection works on
//! the exact base64 ciphertext string: its sha256 digest, scoped to the
//! channel, is set-if-absent in a shared cache with a TTL. A second
//! submission of the same bytes within the TTL is refused.
//!
//! Admission is infallible by design. If the shared cache is down the
//! guard falls back to a bounded in-process window rather than failing
//! open or surfacing an infrastructure error to the message path; the
//! fallback only sees this process's traffic, which is the acceptable
//! degraded mode.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use sha2::{Digest, Sha256};
use vaultline_core::{ReplayWindow, env::Environment};

use crate::store::ReplayCache;

/// Default admission TTL.
pub const DEFAULT_REPLAY_TTL: Duration = Duration::from_secs(600);

/// Detects duplicate ciphertext submissions within a TTL window.
#[derive(Debug, Clone)]
pub struct ReplayGuard<E, C>
where
    E: Environment,
    C: ReplayCache,
{
    env: E,
    cache: C,
    ttl: Duration,
    fallback: Arc<Mutex<ReplayWindow<E::Instant>>>,
}

impl<E, C> ReplayGuard<E, C>
where
    E: Environment,
    C: ReplayCache,
{
    /// Create a guard with the default TTL.
    pub fn new(env: E, cache: C) -> Self {
        Self::with_ttl(env, cache, DEFAULT_REPLAY_TTL)
    }

    /// Create a guard with an explicit TTL.
    pub fn with_ttl(env: E, cache: C, ttl: Duration) -> Self {
        Self {
            env,
            cache,
            ttl,
            fallback: Arc::new(Mutex::new(ReplayWindow::default())),
        }
    }

    /// Admit a ciphertext for a channel. Returns `false` when the same
    /// bytes were already admitted for this channel within the TTL.
    pub fn admit(&self, channel_id: &str, ciphertext: &str) -> bool {
        let key = replay_key(channel_id, ciphertext);
        match self.cache.set_if_absent(&key, self.ttl) {
            Ok(fresh) => fresh,
            Err(error) => {
                tracing::warn!(%error, "replay cache unavailable, using in-process window");
                let now = self.env.now();
                let mut window = self.fallback.lock().expect("replay window mutex poisoned");
                window.insert(&key, self.ttl, now)
            }
        }
    }
}

/// Cache key for one ciphertext on one channel.
fn replay_key(channel_id: &str, ciphertext: &str) -> String {
    let digest = Sha256::digest(ciphertext.as_bytes());
    format!("replay:{channel_id}:{}", hex::encode(digest))
}
