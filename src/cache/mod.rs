//! Cache Module
//!
//! Provides TTL-bound in-memory storage with an injectable clock.

mod clock;
mod entry;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use clock::{Clock, ManualClock, TokioClock};
pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use store::CacheStore;
