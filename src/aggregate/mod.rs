//! Aggregate Module
//!
//! Derived metrics computed from several raw resources and cached under
//! their own key and TTL.

mod classify;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::fetch::{Computed, Fetched, RequestCoordinator, Source};

pub use classify::{BucketCounts, StatusBucket, StatusClassifier};
pub use metrics::dashboard_counters;

/// Pure, total, synchronous combination of source values, in source order.
pub type CombineFn<V> = Arc<dyn Fn(&[V]) -> V + Send + Sync>;

/// Wraps a closure as a [`CombineFn`].
pub fn combine<V, F>(f: F) -> CombineFn<V>
where
    F: Fn(&[V]) -> V + Send + Sync + 'static,
{
    Arc::new(f)
}

// == Aggregator ==
/// Computes and caches derived values on top of a [`RequestCoordinator`].
pub struct Aggregator<V> {
    coordinator: RequestCoordinator<V>,
}

impl<V> Clone for Aggregator<V> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<V> Aggregator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(coordinator: RequestCoordinator<V>) -> Self {
        Self { coordinator }
    }

    // == Get Aggregate ==
    /// Returns the aggregate cached under `agg_key`, recomputing it when missing
    /// or expired.
    ///
    /// Sources resolve in parallel through the coordinator, so a still valid
    /// source is reused without a fetch. Any source failing without a stale
    /// fallback fails the aggregate. A source served stale yields an aggregate
    /// flagged [`Freshness::StaleInput`](crate::fetch::Freshness::StaleInput).
    pub async fn get_aggregate(
        &self,
        agg_key: &str,
        sources: &[Source<V>],
        combine: &CombineFn<V>,
        ttl: Duration,
    ) -> Result<Fetched<V>> {
        let coordinator = self.coordinator.clone();
        let sources = sources.to_vec();
        let combine = Arc::clone(combine);
        let owned_key = agg_key.to_string();

        self.coordinator
            .get_or_compute(agg_key, ttl, move || async move {
                let mut lookups = Vec::with_capacity(sources.len());
                for source in &sources {
                    lookups.push(coordinator.get_or_fetch(&source.key, &source.fetcher, source.ttl));
                }
                let resolved = join_all(lookups).await;

                let mut values = Vec::with_capacity(resolved.len());
                let mut stale_input = false;
                for (source, result) in sources.iter().zip(resolved) {
                    match result {
                        Ok(fetched) => {
                            stale_input |= fetched.is_degraded();
                            values.push(fetched.value);
                        }
                        Err(err) => {
                            return Err(CacheError::AggregateFailed {
                                key: owned_key,
                                reason: format!("source '{}' failed: {err}", source.key),
                            });
                        }
                    }
                }

                if stale_input {
                    warn!(key = %owned_key, "Aggregate computed from stale input");
                }
                let value = combine(&values);
                debug!(key = %owned_key, sources = values.len(), stale_input, "Aggregate recomputed");

                Ok(Computed { value, stale_input })
            })
            .await
    }
}
