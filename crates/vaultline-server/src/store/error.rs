//! Store and cache error types.

use thiserror::Error;

/// Document store failure.
///
/// Retryable from the caller's perspective: the RevocationOracle and
/// PrekeyBundleBroker propagate these as transient infrastructure errors
/// rather than authorization decisions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored document failed to deserialize or violated an invariant.
    #[error("store corruption: {0}")]
    Corruption(String),
}

/// Shared replay cache failure.
///
/// Never propagated past the ReplayGuard: cache outage degrades to the
/// in-process fallback window instead of blocking message delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not be reached or timed out.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
