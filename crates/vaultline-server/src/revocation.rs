//! Revocation oracle: principal generation lookups with a TTL cache.
//!
//! A credential is live only while its embedded generation matches the
//! principal's current generation. Bumping the generation (logout
//! everywhere, key compromise) invalidates every outstanding credential.
//!
//! The check is deliberately bounded-staleness, not instantaneous: the
//! generation is cached per principal for a short TTL so the store is not
//! hit on every request. A revocation becomes fully effective within one
//! TTL window; callers who need it sooner invalidate the cache entry when
//! they process the revocation event. A TTL of zero disables caching.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use thiserror::Error;
use vaultline_core::{VerifiedClaims, env::Environment, error::AuthError};

use crate::store::{PrincipalStore, StoreError};

/// How long a fetched generation stays fresh.
pub const DEFAULT_GENERATION_TTL: Duration = Duration::from_secs(30);

/// Revocation oracle configuration.
#[derive(Debug, Clone)]
pub struct RevocationConfig {
    /// Cache TTL for per-principal generations. Zero disables caching,
    /// making revocation instantaneous at the cost of a store round-trip
    /// per request.
    pub cache_ttl: Duration,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self { cache_ttl: DEFAULT_GENERATION_TTL }
    }
}

/// Errors from revocation checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevocationError {
    /// The principal no longer exists; every credential for it is dead.
    #[error("principal not found: {0}")]
    PrincipalNotFound(String),

    /// The credential's generation was superseded.
    #[error(transparent)]
    Revoked(AuthError),

    /// The principal store could not answer. Retryable.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
struct CachedGeneration<I> {
    generation: u64,
    fetched_at: I,
}

/// Maps a principal to its current credential generation.
///
/// Clone shares the cache; the cache is read-mostly and concurrent misses
/// for the same principal resolve last-writer-wins, which is harmless
/// because every writer fetched from the same store.
#[derive(Debug, Clone)]
pub struct RevocationOracle<E, P>
where
    E: Environment,
    P: PrincipalStore,
{
    env: E,
    store: P,
    config: RevocationConfig,
    cache: Arc<Mutex<HashMap<String, CachedGeneration<E::Instant>>>>,
}

impl<E, P> RevocationOracle<E, P>
where
    E: Environment,
    P: PrincipalStore,
{
    /// Create an oracle over the given principal store.
    pub fn new(env: E, store: P, config: RevocationConfig) -> Self {
        Self { env, store, config, cache: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Current generation for a principal, served from cache when fresher
    /// than the TTL.
    pub fn current_generation(&self, principal_id: &str) -> Result<u64, RevocationError> {
        let now = self.env.now();

        {
            let cache = self.cache.lock().expect("revocation cache mutex poisoned");
            if let Some(entry) = cache.get(principal_id)
                && now - entry.fetched_at < self.config.cache_ttl
            {
                return Ok(entry.generation);
            }
        }

        let generation = self
            .store
            .generation(principal_id)?
            .ok_or_else(|| RevocationError::PrincipalNotFound(principal_id.to_owned()))?;

        let mut cache = self.cache.lock().expect("revocation cache mutex poisoned");
        cache.insert(principal_id.to_owned(), CachedGeneration { generation, fetched_at: now });
        Ok(generation)
    }

    /// Reject claims whose generation no longer matches the live one.
    pub fn ensure_active(&self, claims: &VerifiedClaims) -> Result<(), RevocationError> {
        let live = self.current_generation(&claims.subject)?;
        if claims.generation == live {
            Ok(())
        } else {
            tracing::debug!(subject = %claims.subject, "credential generation superseded");
            Err(RevocationError::Revoked(AuthError::TokenRevoked))
        }
    }

    /// Drop one principal's cached generation. Called when processing an
    /// explicit revocation event so the bump takes effect immediately.
    pub fn invalidate(&self, principal_id: &str) {
        let mut cache = self.cache.lock().expect("revocation cache mutex poisoned");
        cache.remove(principal_id);
    }

    /// Drop the whole cache. Test isolation.
    pub fn clear(&self) {
        let mut cache = self.cache.lock().expect("revocation cache mutex poisoned");
        cache.clear();
    }
}
