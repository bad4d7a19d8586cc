//! Cache Statistics Module
//!
//! Tracks read-through metrics: hits, misses, joined fetches, stale serves and failures.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache layer metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads answered from a valid entry
    pub hits: u64,
    /// Reads that started a new fetch
    pub misses: u64,
    /// Reads that joined an in-flight fetch
    pub joined: u64,
    /// Reads answered with a stale value after a failed refresh
    pub stale_served: u64,
    /// Fetches that exhausted their retries
    pub fetch_failures: u64,
    /// Fetch results discarded because the key was invalidated mid-flight
    pub superseded: u64,
    /// Entries removed by invalidation
    pub invalidations: u64,
    /// Current number of entries in the store
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Share of reads that did not start a fetch.
    ///
    /// Returns (hits + joined) / (hits + joined + misses), or 0.0 if no reads happened.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.joined;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_join(&mut self) {
        self.joined += 1;
    }

    pub fn record_stale_served(&mut self) {
        self.stale_served += 1;
    }

    pub fn record_fetch_failure(&mut self) {
        self.fetch_failures += 1;
    }

    pub fn record_superseded(&mut self) {
        self.superseded += 1;
    }

    pub fn record_invalidations(&mut self, count: usize) {
        self.invalidations += count as u64;
    }

    // == Update Entry Count ==
    /// Updates the total entries count.
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats, CacheStats::default());
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_joins_as_served() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_join();
        stats.record_miss();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_hit_rate_all_misses() {
        let mut stats = CacheStats::new();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_record_invalidations_accumulates() {
        let mut stats = CacheStats::new();
        stats.record_invalidations(2);
        stats.record_invalidations(0);
        stats.record_invalidations(3);
        assert_eq!(stats.invalidations, 5);
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = CacheStats::new();
        stats.record_stale_served();
        stats.set_total_entries(4);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["stale_served"], 1);
        assert_eq!(json["total_entries"], 4);
    }
}
