//! In-memory store implementations for testing and simulation.
//!
//! Each store wraps its state in `Arc<Mutex<_>>` so clones share the same
//! underlying data, matching how a real store client would behave. The
//! mutator methods that the production system does NOT need (seeding
//! principals, wiring memberships) exist only for tests and drivers.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use super::{CacheError, ReplayCache, StoreError, StoredBundle};

/// In-memory principal store: principal id → credential generation.
#[derive(Debug, Clone, Default)]
pub struct MemoryPrincipals {
    inner: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryPrincipals {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a principal's generation.
    pub fn set_generation(&self, principal_id: &str, generation: u64) {
        let mut inner = self.inner.lock().expect("MemoryPrincipals mutex poisoned");
        inner.insert(principal_id.to_owned(), generation);
    }

    /// Increment a principal's generation (a revocation event). Returns the
    /// new value, or `None` if the principal does not exist.
    pub fn bump_generation(&self, principal_id: &str) -> Option<u64> {
        let mut inner = self.inner.lock().expect("MemoryPrincipals mutex poisoned");
        let generation = inner.get_mut(principal_id)?;
        *generation += 1;
        Some(*generation)
    }

    /// Delete a principal entirely.
    pub fn remove(&self, principal_id: &str) {
        let mut inner = self.inner.lock().expect("MemoryPrincipals mutex poisoned");
        inner.remove(principal_id);
    }
}

impl super::PrincipalStore for MemoryPrincipals {
    fn generation(&self, principal_id: &str) -> Result<Option<u64>, StoreError> {
        let inner = self.inner.lock().expect("MemoryPrincipals mutex poisoned");
        Ok(inner.get(principal_id).copied())
    }
}

/// In-memory chat membership: channel id → member principal ids.
#[derive(Debug, Clone, Default)]
pub struct MemoryMembership {
    inner: Arc<Mutex<HashMap<String, HashSet<String>>>>,
}

impl MemoryMembership {
    /// Create an empty membership table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a principal to a channel.
    pub fn add_member(&self, channel_id: &str, principal_id: &str) {
        let mut inner = self.inner.lock().expect("MemoryMembership mutex poisoned");
        inner.entry(channel_id.to_owned()).or_default().insert(principal_id.to_owned());
    }

    /// Remove a principal from a channel.
    pub fn remove_member(&self, channel_id: &str, principal_id: &str) {
        let mut inner = self.inner.lock().expect("MemoryMembership mutex poisoned");
        if let Some(members) = inner.get_mut(channel_id) {
            members.remove(principal_id);
        }
    }
}

impl super::MembershipStore for MemoryMembership {
    fn is_member(&self, channel_id: &str, principal_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("MemoryMembership mutex poisoned");
        Ok(inner.get(channel_id).is_some_and(|members| members.contains(principal_id)))
    }
}

/// In-memory prekey bundle store.
///
/// The mutex makes `consume_one_time_key` an atomic compare-and-swap: the
/// load of the `used` flag and the flip happen under one lock, exactly the
/// conditional-update contract a document store provides.
#[derive(Debug, Clone, Default)]
pub struct MemoryBundles {
    inner: Arc<Mutex<HashMap<String, StoredBundle>>>,
}

impl MemoryBundles {
    /// Create an empty bundle store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl super::BundleStore for MemoryBundles {
    fn replace_bundle(&self, owner_id: &str, bundle: StoredBundle) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("MemoryBundles mutex poisoned");
        inner.insert(owner_id.to_owned(), bundle);
        Ok(())
    }

    fn load_bundle(&self, owner_id: &str) -> Result<Option<StoredBundle>, StoreError> {
        let inner = self.inner.lock().expect("MemoryBundles mutex poisoned");
        Ok(inner.get(owner_id).cloned())
    }

    fn consume_one_time_key(&self, owner_id: &str, key_id: u32) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("MemoryBundles mutex poisoned");
        let Some(bundle) = inner.get_mut(owner_id) else {
            return Ok(false);
        };
        let Some(key) = bundle.one_time_pre_keys.iter_mut().find(|k| k.key_id == key_id) else {
            return Ok(false);
        };
        if key.used {
            return Ok(false);
        }
        key.used = true;
        Ok(true)
    }
}

/// In-memory replay cache with real-time expiry.
///
/// Stands in for the shared cache in tests; `set_if_absent` is atomic under
/// the mutex, mirroring the cache server's NX+EX semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryReplayCache {
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl MemoryReplayCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored (expired keys included until the
    /// next `set_if_absent` touches them).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("MemoryReplayCache mutex poisoned").len()
    }

    /// Whether the cache holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key. Test isolation.
    pub fn clear(&self) {
        self.inner.lock().expect("MemoryReplayCache mutex poisoned").clear();
    }
}

impl ReplayCache for MemoryReplayCache {
    fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("MemoryReplayCache mutex poisoned");
        if let Some(expiry) = inner.get(key)
            && *expiry > now
        {
            return Ok(false);
        }
        inner.insert(key.to_owned(), now + ttl);
        Ok(true)
    }
}
