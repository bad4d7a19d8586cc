//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

// == Cache Entry ==
/// A single cached value and the metadata needed to judge its validity.
///
/// Entries are never mutated; a refresh replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the value was stored
    pub stored_at: Instant,
    /// How long the value stays valid after `stored_at`
    pub ttl: Duration,
    /// Set on aggregates computed from at least one stale source
    pub stale_input: bool,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry for a freshly fetched value.
    pub fn new(value: V, stored_at: Instant, ttl: Duration) -> Self {
        Self::derived(value, stored_at, ttl, false)
    }

    /// Creates an entry for a derived value.
    pub fn derived(value: V, stored_at: Instant, ttl: Duration, stale_input: bool) -> Self {
        Self {
            value,
            stored_at,
            ttl,
            stale_input,
        }
    }

    // == Validity ==
    /// Checks if the entry is still valid at `now`.
    ///
    /// Boundary condition: once the full TTL has elapsed the entry is invalid,
    /// i.e. valid iff `now - stored_at < ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.age_at(now) < self.ttl
    }

    /// Time elapsed since the value was stored.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }
}
