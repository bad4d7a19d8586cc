//! Cache Layer
//!
//! Facade bundling the coordinator, aggregator and change feed that share
//! one store.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::aggregate::{Aggregator, CombineFn};
use crate::cache::{Clock, TokioClock};
use crate::config::Config;
use crate::error::Result;
use crate::feed::{ChangeFeed, Trigger};
use crate::fetch::{Fetched, RequestCoordinator, RetryExecutor, Snapshot, Source};
use crate::tasks::{RefreshTarget, Scheduler};

/// Entry point for consumers of the cache.
///
/// Cloning is cheap; clones share the store, the pending map and the feed.
pub struct CacheLayer<V> {
    coordinator: RequestCoordinator<V>,
    aggregator: Aggregator<V>,
    feed: ChangeFeed<V>,
}

impl<V> Clone for CacheLayer<V> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            aggregator: self.aggregator.clone(),
            feed: self.feed.clone(),
        }
    }
}

impl<V> CacheLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a layer on the Tokio clock. Must be called from within a
    /// Tokio runtime since it spawns the feed dispatcher.
    pub fn new(config: &Config) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let coordinator = RequestCoordinator::new(clock, RetryExecutor::new(config.retry));
        let aggregator = Aggregator::new(coordinator.clone());
        let feed = ChangeFeed::new(coordinator.clone(), config.debounce);

        info!(
            max_attempts = config.retry.max_attempts,
            debounce_ms = config.debounce.as_millis() as u64,
            "Cache layer initialized"
        );

        Self {
            coordinator,
            aggregator,
            feed,
        }
    }

    /// Read-through get of a raw source.
    pub async fn get(&self, source: &Source<V>) -> Result<Fetched<V>> {
        self.coordinator
            .get_or_fetch(&source.key, &source.fetcher, source.ttl)
            .await
    }

    /// Read-through get of an aggregate. Also registers `agg_key` as
    /// dependent on its sources so change events reach it.
    pub async fn get_aggregate(
        &self,
        agg_key: &str,
        sources: &[Source<V>],
        combine: &CombineFn<V>,
        ttl: Duration,
    ) -> Result<Fetched<V>> {
        self.feed.depend_on_keys(agg_key, sources.iter().map(|source| source.key.as_str()));
        self.aggregator.get_aggregate(agg_key, sources, combine, ttl).await
    }

    /// Resolves a scheduler target through the matching read path.
    pub async fn resolve(&self, target: &RefreshTarget<V>) -> Result<Fetched<V>> {
        match target {
            RefreshTarget::Source(source) => self.get(source).await,
            RefreshTarget::Aggregate {
                key,
                sources,
                combine,
                ttl,
            } => self.get_aggregate(key, sources, combine, *ttl).await,
        }
    }

    pub fn publish(&self, trigger: impl Into<Trigger>) {
        self.feed.publish(trigger);
    }

    pub fn invalidate<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.coordinator.invalidate(keys)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.coordinator.snapshot()
    }

    pub fn coordinator(&self) -> &RequestCoordinator<V> {
        &self.coordinator
    }

    pub fn feed(&self) -> &ChangeFeed<V> {
        &self.feed
    }

    /// Stops the change feed. Reads keep working.
    pub fn shutdown(&self) {
        self.feed.shutdown();
    }
}

impl<V> CacheLayer<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a stopped scheduler driving this layer's feed.
    pub fn scheduler(&self, targets: Vec<RefreshTarget<V>>, poll_interval: Option<Duration>) -> Scheduler<V> {
        Scheduler::new(self.feed.clone(), targets, poll_interval)
    }
}
