//! Cache Store Module
//!
//! The key to entry mapping, with write generations and statistics.
//!
//! The store is synchronous; the async [`Cache`](crate::cache::Cache) facade
//! holds it behind a mutex and never keeps the lock across an `.await`.

use std::collections::HashMap;

use crate::cache::{CacheEntry, CacheStats};

// == Cache Store ==
/// Entry storage exclusively owning every [`CacheEntry`].
#[derive(Debug, Default)]
pub struct CacheStore {
    /// Key-entry storage
    entries: HashMap<String, CacheEntry>,
    /// Activity statistics
    stats: CacheStats,
    /// Last generation handed out
    generation: u64,
}

impl CacheStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a generation no other write has used.
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    // == Insert ==
    /// Stores `entry` under `key`, replacing any previous entry.
    ///
    /// The previous entry's expiry action is cancelled and its `created_at`
    /// carried over, so creation time stays fixed for the key.
    pub fn insert(&mut self, key: String, mut entry: CacheEntry) {
        if let Some(mut previous) = self.entries.remove(&key) {
            previous.cancel_expiry();
            entry.created_at = previous.created_at;
        }
        self.entries.insert(key, entry);
        self.stats.set_total_entries(self.entries.len());
    }

    // == Lookup ==
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// The entry for `key`, only if it is still the write tagged `generation`.
    pub fn get_current_mut(&mut self, key: &str, generation: u64) -> Option<&mut CacheEntry> {
        self.entries
            .get_mut(key)
            .filter(|entry| entry.generation == generation)
    }

    // == Remove ==
    /// Removes an entry by key, cancelling its expiry action.
    ///
    /// Returns whether an entry existed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(mut entry) => {
                entry.cancel_expiry();
                self.stats.set_total_entries(self.entries.len());
                true
            }
            None => false,
        }
    }

    /// Removes `key` only if it is still the write tagged `generation`.
    pub fn remove_current(&mut self, key: &str, generation: u64) -> bool {
        if self.get_current_mut(key, generation).is_some() {
            self.remove(key)
        } else {
            false
        }
    }

    // == Clear ==
    /// Cancels every expiry action and empties the store.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, mut entry) in self.entries.drain() {
            entry.cancel_expiry();
        }
        self.stats.set_total_entries(0);
        count
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
