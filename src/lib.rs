//! Feed Cache - A read-through cache in front of a rate-metered JSON API
//!
//! Deduplicates concurrent fetches, retries with backoff, falls back to stale
//! data, and recomputes aggregates only when their inputs change.

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod layer;
pub mod models;
pub mod tasks;
pub mod upstream;

pub use api::AppState;
pub use config::Config;
pub use error::{CacheError, Result};
pub use layer::CacheLayer;
pub use tasks::{RefreshTarget, Scheduler};
