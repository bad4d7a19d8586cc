//! Cache Store Module
//!
//! Keyed storage of TTL-bound entries answering validity and invalidation queries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::cache::{CacheEntry, Clock};

// == Cache Store ==
/// In-memory keyed storage of [`CacheEntry`] values.
///
/// Expired entries are kept until explicitly invalidated: they are the
/// fallback served when a refresh fails.
#[derive(Debug)]
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Time source for validity checks
    clock: Arc<dyn Clock>,
    /// Wall-clock time of the last write, for diagnostics
    last_updated: Option<DateTime<Utc>>,
}

impl<V> CacheStore<V> {
    // == Constructor ==
    /// Creates an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
            last_updated: None,
        }
    }

    /// Current instant according to the injected clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    // == Get ==
    /// Returns the entry for `key`, valid or not.
    ///
    /// Never has side effects.
    pub fn get(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Returns the entry for `key` only if it is still valid.
    pub fn get_valid(&self, key: &str) -> Option<&CacheEntry<V>> {
        let now = self.now();
        self.entries.get(key).filter(|entry| entry.is_valid_at(now))
    }

    // == Is Valid ==
    /// Checks whether `key` holds an entry that has not outlived its TTL.
    pub fn is_valid(&self, key: &str) -> bool {
        self.get_valid(key).is_some()
    }

    // == Set ==
    /// Stores a value, replacing any previous entry for the key.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        self.set_derived(key, value, ttl, false);
    }

    /// Stores a derived value, recording whether it was computed from stale input.
    pub fn set_derived(&mut self, key: impl Into<String>, value: V, ttl: Duration, stale_input: bool) {
        let entry = CacheEntry::derived(value, self.now(), ttl, stale_input);
        self.entries.insert(key.into(), entry);
        self.last_updated = Some(Utc::now());
    }

    // == Invalidate ==
    /// Removes the given keys. Absent keys are ignored.
    ///
    /// Returns the number of entries actually removed.
    pub fn invalidate<I, K>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter()
            .filter(|key| self.entries.remove(key.as_ref()).is_some())
            .count()
    }

    // == Clear ==
    /// Removes every entry, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Wall-clock time of the last write.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    // == Length ==
    /// Returns the current number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
