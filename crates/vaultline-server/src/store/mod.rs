//! Collaborator store seams.
//!
//! Trait-based abstractions for the external document store (principals,
//! prekey bundles, chat membership) and the shared replay cache. The traits
//! are synchronous (no async) to keep the authorization logic pure; the
//! production glue adapts them to whatever client library it uses.
//!
//! Implementations must be `Clone + Send + Sync`, typically sharing state
//! via `Arc`, so the same store can back multiple components.

mod chaotic;
mod error;
mod memory;

use std::{collections::HashSet, time::Duration};

pub use chaotic::ChaoticCache;
pub use error::{CacheError, StoreError};
pub use memory::{MemoryBundles, MemoryMembership, MemoryPrincipals, MemoryReplayCache};
use serde::{Deserialize, Serialize};

/// Signed prekey inside a bundle: medium-term key plus the owner's
/// signature over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    /// Owner-assigned key identifier.
    pub key_id: u32,
    /// Base64 public key.
    pub public_key: String,
    /// Base64 signature by the owner's identity key.
    pub signature: String,
}

/// One-time prekey: consumed by exactly one correspondent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKey {
    /// Owner-assigned key identifier.
    pub key_id: u32,
    /// Base64 public key.
    pub public_key: String,
    /// Whether a correspondent has already claimed this key.
    #[serde(default)]
    pub used: bool,
}

/// Who may claim from a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicy {
    /// Any authenticated principal may claim.
    #[serde(default)]
    pub allow_any_requester: bool,
    /// Principals explicitly allowed to claim.
    #[serde(default)]
    pub allowed_requesters: HashSet<String>,
}

/// A principal's published prekey bundle as persisted.
///
/// Updated only by full replacement; the one-time key `used` flags are the
/// single exception, flipped via [`BundleStore::consume_one_time_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBundle {
    /// Base64 long-term identity public key.
    pub identity_key: String,
    /// Medium-term signed prekey.
    pub signed_pre_key: SignedPreKey,
    /// One-time prekeys in publication order.
    pub one_time_pre_keys: Vec<OneTimePreKey>,
    /// Claim authorization policy.
    #[serde(flatten)]
    pub policy: AccessPolicy,
}

/// Principal attributes relevant to revocation.
pub trait PrincipalStore: Clone + Send + Sync + 'static {
    /// Current credential generation for a principal.
    ///
    /// Returns `None` if the principal does not exist (deleted accounts
    /// invalidate every outstanding credential).
    fn generation(&self, principal_id: &str) -> Result<Option<u64>, StoreError>;
}

/// Chat membership lookups, delegated to the external chat store.
pub trait MembershipStore: Clone + Send + Sync + 'static {
    /// Whether `principal_id` is a member of `channel_id`.
    fn is_member(&self, channel_id: &str, principal_id: &str) -> Result<bool, StoreError>;
}

/// Prekey bundle persistence.
pub trait BundleStore: Clone + Send + Sync + 'static {
    /// Replace the owner's bundle atomically (policy and key set included;
    /// no partial merge).
    fn replace_bundle(&self, owner_id: &str, bundle: StoredBundle) -> Result<(), StoreError>;

    /// Load the owner's bundle. `None` if the owner never published one.
    fn load_bundle(&self, owner_id: &str) -> Result<Option<StoredBundle>, StoreError>;

    /// Conditionally mark one-time key `key_id` as used, guarded by
    /// "still unused" — the compare-and-swap this system's single-use
    /// guarantee rests on.
    ///
    /// Returns `true` if THIS call flipped the flag; `false` if the key was
    /// already used (a concurrent claimant won) or does not exist.
    fn consume_one_time_key(&self, owner_id: &str, key_id: u32) -> Result<bool, StoreError>;
}

/// Shared fast key-value cache for replay suppression.
pub trait ReplayCache: Clone + Send + Sync + 'static {
    /// Atomic set-if-absent-with-expiry.
    ///
    /// Returns `true` when the key was newly set, `false` when it already
    /// exists and its TTL has not lapsed. Errors mean the cache is
    /// unreachable; callers degrade to their fallback path.
    fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
}
