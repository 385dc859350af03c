//! Bounded in-process replay window.
//!
//! Fallback store for replay suppression when the shared cache is
//! unavailable: a map from replay key to insertion instant + TTL. Memory is
//! bounded opportunistically: once the map grows past its configured
//! capacity, an insertion sweeps out every expired entry.
//!
//! Pure data structure; the server wraps it in a mutex and supplies time.

use std::{collections::HashMap, ops::Sub, time::Duration};

/// Default capacity above which insertions sweep expired entries.
pub const DEFAULT_FALLBACK_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Copy)]
struct Entry<I> {
    inserted: I,
    ttl: Duration,
}

/// Sliding-window deduplication map.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug, Clone)]
pub struct ReplayWindow<I> {
    entries: HashMap<String, Entry<I>>,
    capacity: usize,
}

impl<I> ReplayWindow<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a window that sweeps once it exceeds `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), capacity }
    }

    /// Record `key` if it is not already live.
    ///
    /// Returns `true` when the key was admitted (first sighting, or the
    /// previous sighting's TTL has lapsed), `false` on a duplicate still
    /// within its TTL.
    pub fn insert(&mut self, key: &str, ttl: Duration, now: I) -> bool {
        if let Some(entry) = self.entries.get(key)
            && now - entry.inserted < entry.ttl
        {
            return false;
        }

        self.entries.insert(key.to_owned(), Entry { inserted: now, ttl });

        // Opportunistic sweep: only expired entries are evicted, so a burst
        // of live keys can exceed capacity until their TTLs lapse.
        if self.entries.len() > self.capacity {
            self.entries.retain(|_, entry| now - entry.inserted < entry.ttl);
        }

        true
    }

    /// Live + expired-but-unswept entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the window holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Test isolation and explicit resets.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<I> Default for ReplayWindow<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_CAPACITY)
    }
}
