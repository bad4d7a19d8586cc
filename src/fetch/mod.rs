//! Fetch Module
//!
//! Read-through orchestration: retrying fetchers, single-flight coordination
//! and the read result contract shared by raw and derived keys.

mod coordinator;
mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::CacheEntry;

pub use coordinator::{Computed, RequestCoordinator, Snapshot};
pub use retry::{RetryExecutor, RetryPolicy};

/// Asynchronous loader for one cache key.
///
/// Must not leave partial writes behind on failure; it may be called again.
pub type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

/// Wraps an async closure as a [`Fetcher`].
///
/// ```ignore
/// let users = fetcher(|| async { Ok(vec!["ada".to_string()]) });
/// ```
pub fn fetcher<V, F, Fut>(f: F) -> Fetcher<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

// == Freshness ==
/// How trustworthy a returned value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// From a valid cache entry or a fetch that just succeeded
    Fresh,
    /// Last known value, served because every retry of a refresh failed
    Stale,
    /// Aggregate computed from at least one stale source
    StaleInput,
}

// == Fetched ==
/// Result of a read-through lookup.
#[derive(Debug, Clone)]
pub struct Fetched<V> {
    pub value: V,
    pub freshness: Freshness,
    /// When the underlying value was stored
    pub stored_at: Instant,
}

impl<V: Clone> Fetched<V> {
    pub(crate) fn from_entry(entry: &CacheEntry<V>) -> Self {
        Self {
            value: entry.value.clone(),
            freshness: if entry.stale_input {
                Freshness::StaleInput
            } else {
                Freshness::Fresh
            },
            stored_at: entry.stored_at,
        }
    }
}

impl<V> Fetched<V> {
    /// True unless the value is fully fresh.
    pub fn is_degraded(&self) -> bool {
        self.freshness != Freshness::Fresh
    }
}

// == Source ==
/// A raw resource: its cache key, how to load it and how long it stays valid.
pub struct Source<V> {
    pub key: String,
    pub fetcher: Fetcher<V>,
    pub ttl: Duration,
}

impl<V> Source<V> {
    pub fn new(key: impl Into<String>, ttl: Duration, fetcher: Fetcher<V>) -> Self {
        Self {
            key: key.into(),
            fetcher,
            ttl,
        }
    }
}

impl<V> Clone for Source<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: Arc::clone(&self.fetcher),
            ttl: self.ttl,
        }
    }
}
