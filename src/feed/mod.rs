//! Change Feed
//!
//! Turns change signals into targeted cache invalidations.
//!
//! Push notifications and poll-detected changes both enter through
//! [`ChangeFeed::publish`] and land on one channel drained by a single
//! dispatcher task. The dispatcher debounces per resource with a fixed
//! window: the first trigger opens the window, everything arriving before
//! it closes is merged, and one flush runs at the end of it.

mod event;

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fetch::RequestCoordinator;

pub use event::{ChangeEvent, EventKind, Trigger};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Callback run after the invalidations of a flush.
pub type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Wraps a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identifies one subscription. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Clone)]
struct Subscription {
    resource: String,
    /// Empty means every kind
    event_types: Vec<EventKind>,
    handler: Handler,
}

impl Subscription {
    fn accepts(&self, kind: EventKind) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&kind)
    }
}

#[derive(Default)]
struct Registry {
    /// resource -> raw cache keys
    bindings: HashMap<String, BTreeSet<String>>,
    /// resource -> aggregate keys derived from it
    dependents: HashMap<String, BTreeSet<String>>,
    subscriptions: HashMap<u64, Subscription>,
    next_id: u64,
    closed: bool,
}

impl Registry {
    /// An unbound resource maps to the cache key of the same name.
    fn raw_keys(&self, resource: &str) -> Vec<String> {
        match self.bindings.get(resource) {
            Some(keys) => keys.iter().cloned().collect(),
            None => vec![resource.to_string()],
        }
    }

    fn aggregate_keys(&self, resource: &str) -> Vec<String> {
        self.dependents
            .get(resource)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn subscriptions_for(&self, resource: &str) -> Vec<Subscription> {
        self.subscriptions
            .values()
            .filter(|sub| sub.resource == resource)
            .cloned()
            .collect()
    }

    fn resources_for_key(&self, key: &str) -> BTreeSet<String> {
        let mut resources: BTreeSet<String> = self
            .bindings
            .iter()
            .filter(|(_, keys)| keys.contains(key))
            .map(|(resource, _)| resource.clone())
            .collect();
        if !self.bindings.contains_key(key) {
            resources.insert(key.to_string());
        }
        resources
    }
}

/// Triggers merged for one resource inside a debounce window.
struct Batch {
    deadline: Instant,
    kinds: BTreeSet<EventKind>,
    pushed: bool,
    merged: usize,
}

impl Batch {
    fn open(deadline: Instant) -> Self {
        Self {
            deadline,
            kinds: BTreeSet::new(),
            pushed: false,
            merged: 0,
        }
    }

    fn absorb(&mut self, trigger: &Trigger) {
        self.kinds.insert(trigger.kind());
        self.pushed |= matches!(trigger, Trigger::Push(_));
        self.merged += 1;
    }
}

// == Change Feed ==
/// Subscription registry plus debounced invalidation dispatcher.
///
/// Cloning is cheap and every clone feeds the same dispatcher.
pub struct ChangeFeed<V> {
    coordinator: RequestCoordinator<V>,
    registry: Arc<Mutex<Registry>>,
    tx: mpsc::UnboundedSender<Trigger>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<V> Clone for ChangeFeed<V> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            registry: Arc::clone(&self.registry),
            tx: self.tx.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<V> ChangeFeed<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a feed and spawns its dispatcher. Must be called from within
    /// a Tokio runtime.
    pub fn new(coordinator: RequestCoordinator<V>, window: Duration) -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(dispatch(rx, coordinator.clone(), Arc::clone(&registry), window));

        Self {
            coordinator,
            registry,
            tx,
            dispatcher: Arc::new(Mutex::new(Some(task))),
        }
    }

    // == Wiring ==
    /// Maps `resource` to the raw cache keys it invalidates, replacing any
    /// previous binding.
    pub fn bind<I, K>(&self, resource: &str, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        self.registry.lock().bindings.insert(resource.to_string(), keys);
    }

    /// Declares that the aggregate `agg_key` is derived from `resources`.
    pub fn depend<I, K>(&self, agg_key: &str, resources: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut registry = self.registry.lock();
        for resource in resources {
            registry
                .dependents
                .entry(resource.into())
                .or_default()
                .insert(agg_key.to_string());
        }
    }

    /// Declares that `agg_key` is derived from the raw cache keys
    /// `source_keys`, resolving each key to the resources bound to it.
    pub fn depend_on_keys<I, K>(&self, agg_key: &str, source_keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut registry = self.registry.lock();
        let resources: BTreeSet<String> = source_keys
            .into_iter()
            .flat_map(|key| registry.resources_for_key(key.as_ref()))
            .collect();
        for resource in resources {
            registry
                .dependents
                .entry(resource)
                .or_default()
                .insert(agg_key.to_string());
        }
    }

    /// Resources whose raw keys include `key`.
    pub fn resources_for_key(&self, key: &str) -> Vec<String> {
        self.registry.lock().resources_for_key(key).into_iter().collect()
    }

    // == Subscriptions ==
    /// Registers `handler` for changes to `resource`. An empty `event_types`
    /// accepts every kind.
    ///
    /// After shutdown the returned handle is inert.
    pub fn subscribe(&self, resource: &str, event_types: &[EventKind], handler: Handler) -> SubscriptionHandle {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        if registry.closed {
            debug!(resource = %resource, "Subscribe after shutdown ignored");
            return SubscriptionHandle(id);
        }

        registry.subscriptions.insert(
            id,
            Subscription {
                resource: resource.to_string(),
                event_types: event_types.to_vec(),
                handler,
            },
        );
        SubscriptionHandle(id)
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.registry.lock().subscriptions.remove(&handle.0).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.lock().subscriptions.len()
    }

    // == Publish ==
    /// Queues a change signal for the dispatcher. A no-op after shutdown.
    pub fn publish(&self, trigger: impl Into<Trigger>) {
        let trigger = trigger.into();
        if self.registry.lock().closed {
            debug!(resource = %trigger.resource(), "Publish after shutdown ignored");
            return;
        }
        if let Err(err) = self.tx.send(trigger) {
            warn!(resource = %err.0.resource(), "Dispatcher gone, trigger dropped");
        }
    }

    /// Stops the dispatcher and drops every subscription. Idempotent.
    ///
    /// Triggers still inside a debounce window are discarded.
    pub fn shutdown(&self) {
        {
            let mut registry = self.registry.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry.subscriptions.clear();
        }
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
        info!("Change feed shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }

    pub fn coordinator(&self) -> &RequestCoordinator<V> {
        &self.coordinator
    }
}

// == Dispatcher ==
async fn dispatch<V>(
    mut rx: mpsc::UnboundedReceiver<Trigger>,
    coordinator: RequestCoordinator<V>,
    registry: Arc<Mutex<Registry>>,
    window: Duration,
) where
    V: Clone + Send + Sync + 'static,
{
    let mut batches: HashMap<String, Batch> = HashMap::new();

    loop {
        let next_deadline = batches.values().map(|batch| batch.deadline).min();

        tokio::select! {
            received = rx.recv() => match received {
                Some(trigger) => {
                    batches
                        .entry(trigger.resource().to_string())
                        .or_insert_with(|| Batch::open(Instant::now() + window))
                        .absorb(&trigger);
                }
                None => break,
            },
            _ = wait_until(next_deadline) => {
                let now = Instant::now();
                let due: Vec<String> = batches
                    .iter()
                    .filter(|(_, batch)| batch.deadline <= now)
                    .map(|(resource, _)| resource.clone())
                    .collect();

                for resource in due {
                    if let Some(batch) = batches.remove(&resource) {
                        flush(&coordinator, &registry, &resource, batch);
                    }
                }
            }
        }
    }

    debug!("Change feed dispatcher stopped");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn flush<V>(coordinator: &RequestCoordinator<V>, registry: &Mutex<Registry>, resource: &str, batch: Batch)
where
    V: Clone + Send + Sync + 'static,
{
    // Handlers run outside the lock so they may subscribe or unsubscribe.
    let (raw_keys, aggregate_keys, subscriptions) = {
        let registry = registry.lock();
        // A poll trigger means the raw key was just refreshed
        let raw_keys = if batch.pushed {
            registry.raw_keys(resource)
        } else {
            Vec::new()
        };
        (raw_keys, registry.aggregate_keys(resource), registry.subscriptions_for(resource))
    };

    let removed = coordinator.invalidate(raw_keys.iter().chain(aggregate_keys.iter()));
    info!(
        resource = %resource,
        merged = batch.merged,
        raw = ?raw_keys,
        aggregates = ?aggregate_keys,
        removed,
        "Change applied"
    );

    for kind in batch.kinds {
        let event = ChangeEvent::new(resource, kind);
        for sub in subscriptions.iter().filter(|sub| sub.accepts(kind)) {
            // A panicking handler must not take the dispatcher down with it
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event)));
            if outcome.is_err() {
                warn!(resource = %resource, kind = ?kind, "Change handler panicked");
            }
        }
    }
}
