//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use tokio::time::Instant;

use crate::cache::SourceFn;
use crate::events::CacheEvent;
use crate::tasks::ScheduledExpiry;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug)]
pub struct CacheEntry {
    /// The stored serialized value
    pub value: String,
    /// First insertion time for this key (cache-epoch milliseconds)
    pub created_at: u64,
    /// Last successful write or refetch (cache-epoch milliseconds)
    pub updated_at: u64,
    /// TTL in milliseconds, None = never expires
    pub ttl: Option<u64>,
    /// Refetch instead of deleting when found expired
    pub auto_refetch: bool,
    /// Producer used for refetching
    pub source: Option<SourceFn>,
    /// True strictly while a refetch for this key is outstanding
    pub(crate) fetching: bool,
    /// Write generation, unique across the whole cache
    pub(crate) generation: u64,
    /// Pending expiry action, cancelled when the entry is dropped
    pub(crate) expiry: Option<ScheduledExpiry>,
    /// Deadline whose expiry was already counted in the stats
    counted_expiry: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry written at `now`.
    pub fn new(value: String, now: u64, ttl: Option<u64>) -> Self {
        Self {
            value,
            created_at: now,
            updated_at: now,
            ttl,
            auto_refetch: false,
            source: None,
            fetching: false,
            generation: 0,
            expiry: None,
            counted_expiry: None,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry expires once `now` is strictly past `updated_at + ttl`.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at() {
            Some(expires) => now > expires,
            None => false,
        }
    }

    /// Expiration timestamp, or None if the entry never expires.
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl.map(|ttl| self.updated_at.saturating_add(ttl))
    }

    /// Records that the current deadline has passed.
    ///
    /// Returns true only the first time for a given deadline, so one expiry
    /// seen by the timer and by later reads is counted once.
    pub(crate) fn mark_expired(&mut self) -> bool {
        let deadline = self.expires_at();
        if deadline.is_none() || self.counted_expiry == deadline {
            return false;
        }
        self.counted_expiry = deadline;
        true
    }

    /// Whether a detected expiry should refetch rather than delete.
    pub fn refetches_on_expiry(&self) -> bool {
        self.auto_refetch && self.source.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// Payload describing the entry as it is right now.
    pub fn snapshot(&self, key: &str) -> CacheEvent {
        CacheEvent {
            key: key.to_string(),
            value: self.value.clone(),
            ttl: self.ttl,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Cancels the pending expiry action, if any.
    pub(crate) fn cancel_expiry(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.cancel();
        }
    }
}

// == Clock ==
/// Millisecond clock measured from the owning cache's creation.
///
/// Built on tokio's clock so paused-time tests drive expiry deterministically.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was created.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
