//! Refresh Scheduler
//!
//! Background task that keeps a set of targets warm by polling, and the
//! owner of the subscriptions wired when it starts.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, CombineFn};
use crate::error::Result;
use crate::feed::{ChangeFeed, EventKind, Handler, SubscriptionHandle, Trigger};
use crate::fetch::{Fetched, Source};

/// Something the scheduler resolves on every tick.
pub enum RefreshTarget<V> {
    Source(Source<V>),
    Aggregate {
        key: String,
        sources: Vec<Source<V>>,
        combine: CombineFn<V>,
        ttl: Duration,
    },
}

impl<V> RefreshTarget<V> {
    pub fn key(&self) -> &str {
        match self {
            RefreshTarget::Source(source) => &source.key,
            RefreshTarget::Aggregate { key, .. } => key,
        }
    }

    /// The target's own key followed by the keys it is derived from.
    fn keys(&self) -> Vec<&str> {
        match self {
            RefreshTarget::Source(source) => vec![source.key.as_str()],
            RefreshTarget::Aggregate { key, sources, .. } => std::iter::once(key.as_str())
                .chain(sources.iter().map(|s| s.key.as_str()))
                .collect(),
        }
    }
}

/// Why a pass is running. Only poll passes publish detected changes; a
/// manual refresh already recomputes every aggregate it would invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Poll,
    Manual,
}

struct PlannedSubscription {
    resource: String,
    event_types: Vec<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    stopped: bool,
    timer: Option<JoinHandle<()>>,
    registered: Vec<SubscriptionHandle>,
}

struct Inner<V> {
    feed: ChangeFeed<V>,
    aggregator: Aggregator<V>,
    targets: Vec<RefreshTarget<V>>,
    poll_interval: Option<Duration>,
    subscriptions: Mutex<Vec<PlannedSubscription>>,
    lifecycle: Mutex<Lifecycle>,
    /// Last value resolved per raw key
    last_seen: Mutex<HashMap<String, V>>,
}

// == Scheduler ==
/// Polling timer plus subscription lifecycle.
///
/// Cloning is cheap and every clone controls the same scheduler. Once
/// stopped it cannot be restarted.
pub struct Scheduler<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Scheduler<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Scheduler<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a stopped scheduler. `poll_interval = None` or a zero period
    /// disables polling; `refresh_now` still works.
    pub fn new(feed: ChangeFeed<V>, targets: Vec<RefreshTarget<V>>, poll_interval: Option<Duration>) -> Self {
        let poll_interval = poll_interval.filter(|period| !period.is_zero());
        let aggregator = Aggregator::new(feed.coordinator().clone());
        Self {
            inner: Arc::new(Inner {
                feed,
                aggregator,
                targets,
                poll_interval,
                subscriptions: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
                last_seen: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Adds a subscription registered on `start` and removed on `stop`.
    pub fn with_subscription(self, resource: &str, event_types: &[EventKind], handler: Handler) -> Self {
        self.inner.subscriptions.lock().push(PlannedSubscription {
            resource: resource.to_string(),
            event_types: event_types.to_vec(),
            handler,
        });
        self
    }

    // == Start ==
    /// Registers subscriptions and aggregate dependencies, then spawns the
    /// poll timer. The first tick runs immediately. Idempotent while running.
    pub fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.running {
            debug!("Scheduler already running");
            return;
        }
        if lifecycle.stopped {
            warn!("Scheduler was stopped and cannot be restarted");
            return;
        }
        lifecycle.running = true;

        let feed = &self.inner.feed;
        for target in &self.inner.targets {
            if let RefreshTarget::Aggregate { key, sources, .. } = target {
                feed.depend_on_keys(key, sources.iter().map(|source| source.key.as_str()));
            }
        }

        for planned in self.inner.subscriptions.lock().iter() {
            let handle = feed.subscribe(&planned.resource, &planned.event_types, Arc::clone(&planned.handler));
            lifecycle.registered.push(handle);
        }

        if let Some(period) = self.inner.poll_interval {
            let inner = Arc::clone(&self.inner);
            lifecycle.timer = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let resolved = inner.resolve_all(Pass::Poll).await;
                    debug!(resolved, "Poll tick complete");
                }
            }));
        }

        info!(
            targets = self.inner.targets.len(),
            subscriptions = lifecycle.registered.len(),
            poll_interval_ms = self.inner.poll_interval.map(|p| p.as_millis() as u64),
            "Scheduler started"
        );
    }

    // == Refresh Now ==
    /// Invalidates every target key once, then resolves all targets
    /// concurrently. Returns how many targets resolved; 0 after `stop`.
    pub async fn refresh_now(&self) -> usize {
        if self.inner.lifecycle.lock().stopped {
            debug!("Refresh requested after stop, ignoring");
            return 0;
        }

        let keys: BTreeSet<&str> = self.inner.targets.iter().flat_map(RefreshTarget::keys).collect();
        let removed = self.inner.feed.coordinator().invalidate(keys);
        info!(removed, "Manual refresh");

        self.inner.resolve_all(Pass::Manual).await
    }

    // == Stop ==
    /// Aborts the timer and removes every subscription this scheduler
    /// registered. Idempotent.
    pub fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.stopped {
            return;
        }
        lifecycle.stopped = true;
        lifecycle.running = false;

        if let Some(timer) = lifecycle.timer.take() {
            timer.abort();
        }
        for handle in lifecycle.registered.drain(..) {
            self.inner.feed.unsubscribe(handle);
        }
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().running
    }

    pub fn targets(&self) -> &[RefreshTarget<V>] {
        &self.inner.targets
    }
}

impl<V> Inner<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn resolve_all(&self, pass: Pass) -> usize {
        let mut pending = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            pending.push(self.resolve(target, pass));
        }

        let mut resolved = 0;
        for (target, result) in self.targets.iter().zip(futures::future::join_all(pending).await) {
            match result {
                Ok(_) => resolved += 1,
                Err(err) => warn!(key = %target.key(), error = %err, "Refresh failed"),
            }
        }
        resolved
    }

    async fn resolve(&self, target: &RefreshTarget<V>, pass: Pass) -> Result<Fetched<V>> {
        match target {
            RefreshTarget::Source(source) => self.resolve_source(source, pass).await,
            RefreshTarget::Aggregate {
                key,
                sources,
                combine,
                ttl,
            } => {
                // Sources first so their changes are observed
                let mut pending = Vec::with_capacity(sources.len());
                for source in sources {
                    pending.push(self.resolve_source(source, pass));
                }
                for result in futures::future::join_all(pending).await {
                    result?;
                }
                self.aggregator.get_aggregate(key, sources, combine, *ttl).await
            }
        }
    }

    async fn resolve_source(&self, source: &Source<V>, pass: Pass) -> Result<Fetched<V>> {
        let fetched = self
            .feed
            .coordinator()
            .get_or_fetch(&source.key, &source.fetcher, source.ttl)
            .await?;
        self.observe(&source.key, &fetched.value, pass);
        Ok(fetched)
    }

    /// Records the value `key` resolved to. On a poll pass a new value
    /// publishes a poll trigger.
    fn observe(&self, key: &str, value: &V, pass: Pass) {
        let previous = self.last_seen.lock().insert(key.to_string(), value.clone());
        let changed = previous.is_some_and(|previous| previous != *value);
        if !changed || pass == Pass::Manual {
            return;
        }

        for resource in self.feed.resources_for_key(key) {
            debug!(key = %key, resource = %resource, "Poll detected change");
            self.feed.publish(Trigger::Polled { resource });
        }
    }
}
