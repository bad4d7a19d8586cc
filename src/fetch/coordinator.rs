//! Request Coordinator
//!
//! Read-through orchestration over a [`CacheStore`]: answers from valid
//! entries, joins in-flight fetches for the same key, and otherwise starts
//! exactly one retried fetch whose result populates the store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheStats, CacheStore, Clock};
use crate::error::{CacheError, Result};
use crate::fetch::{Fetched, Fetcher, Freshness, RetryExecutor};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<Fetched<V>>>>;

/// Output of the work run for a key.
#[derive(Debug, Clone)]
pub struct Computed<V> {
    pub value: V,
    /// The value was derived from at least one stale input
    pub stale_input: bool,
}

impl<V> Computed<V> {
    pub fn fresh(value: V) -> Self {
        Self {
            value,
            stale_input: false,
        }
    }
}

/// Read-only diagnostics view of a coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub cached_keys: Vec<String>,
    pub pending_keys: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub stats: CacheStats,
}

struct PendingRequest<V> {
    epoch: u64,
    future: SharedFetch<V>,
}

struct State<V> {
    store: CacheStore<V>,
    /// At most one in-flight fetch per key
    pending: HashMap<String, PendingRequest<V>>,
    /// Fetches started before a key's floor were superseded by an invalidation
    floors: HashMap<String, u64>,
    /// Floor applied to every key by `clear`
    global_floor: u64,
    next_epoch: u64,
    stats: CacheStats,
}

impl<V> State<V> {
    fn is_superseded(&self, key: &str, epoch: u64) -> bool {
        let floor = self.floors.get(key).copied().unwrap_or(0);
        epoch < floor.max(self.global_floor)
    }

    fn release_pending(&mut self, key: &str, epoch: u64) {
        if self.pending.get(key).is_some_and(|p| p.epoch == epoch) {
            self.pending.remove(key);
        }
    }
}

enum Lookup<V> {
    Hit(Fetched<V>),
    Wait(SharedFetch<V>),
}

// == Request Coordinator ==
/// Single-flight read-through cache front.
///
/// Cloning is cheap and every clone shares the same store.
pub struct RequestCoordinator<V> {
    state: Arc<Mutex<State<V>>>,
    retry: RetryExecutor,
}

impl<V> Clone for RequestCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            retry: self.retry,
        }
    }
}

impl<V> RequestCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>, retry: RetryExecutor) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                store: CacheStore::new(clock),
                pending: HashMap::new(),
                floors: HashMap::new(),
                global_floor: 0,
                next_epoch: 0,
                stats: CacheStats::new(),
            })),
            retry,
        }
    }

    // == Get Or Fetch ==
    /// Returns the cached value for `key`, joining or starting a fetch when
    /// there is no valid entry.
    ///
    /// N concurrent calls for a key without a valid entry produce exactly one
    /// fetcher run. When the retries are exhausted and an older entry exists,
    /// that entry is returned flagged [`Freshness::Stale`].
    pub async fn get_or_fetch(&self, key: &str, fetcher: &Fetcher<V>, ttl: Duration) -> Result<Fetched<V>> {
        let retry = self.retry;
        let fetcher = Arc::clone(fetcher);
        let owned_key = key.to_string();
        self.get_or_compute(key, ttl, move || async move {
            retry.run(&owned_key, &fetcher).await.map(Computed::fresh)
        })
        .await
    }

    /// Single-flight lookup for arbitrary work. `work` is only invoked when
    /// this call starts a new computation.
    pub async fn get_or_compute<W, F>(&self, key: &str, ttl: Duration, work: W) -> Result<Fetched<V>>
    where
        W: FnOnce() -> F,
        F: Future<Output = Result<Computed<V>>> + Send + 'static,
    {
        match self.lookup_or_register(key, ttl, work) {
            Lookup::Hit(fetched) => Ok(fetched),
            Lookup::Wait(shared) => shared.await,
        }
    }

    /// Check-and-register step. Runs under one lock without awaiting, so no
    /// second fetch can start between the cache check and the registration.
    fn lookup_or_register<W, F>(&self, key: &str, ttl: Duration, work: W) -> Lookup<V>
    where
        W: FnOnce() -> F,
        F: Future<Output = Result<Computed<V>>> + Send + 'static,
    {
        let mut state = self.state.lock();

        let hit = state.store.get_valid(key).map(Fetched::from_entry);
        if let Some(fetched) = hit {
            state.stats.record_hit();
            return Lookup::Hit(fetched);
        }

        let joined = state.pending.get(key).map(|p| p.future.clone());
        if let Some(future) = joined {
            state.stats.record_join();
            debug!(key = %key, "Joining in-flight fetch");
            return Lookup::Wait(future);
        }

        state.stats.record_miss();
        let epoch = state.next_epoch;
        state.next_epoch += 1;
        debug!(key = %key, epoch, "Starting fetch");

        let task = tokio::spawn(self.clone().settle_after(key.to_string(), epoch, ttl, work()));
        let weak = Arc::downgrade(&self.state);
        let owned_key = key.to_string();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    release_after_crash(&weak, &owned_key, epoch);
                    Err(CacheError::Internal(format!(
                        "fetch task for '{owned_key}' failed: {err}"
                    )))
                }
            }
        }
        .boxed()
        .shared();

        state.pending.insert(
            key.to_string(),
            PendingRequest {
                epoch,
                future: future.clone(),
            },
        );
        Lookup::Wait(future)
    }

    async fn settle_after<F>(self, key: String, epoch: u64, ttl: Duration, work: F) -> Result<Fetched<V>>
    where
        F: Future<Output = Result<Computed<V>>> + Send + 'static,
    {
        let outcome = work.await;
        self.settle(&key, epoch, ttl, outcome)
    }

    /// Records the outcome of fetch `epoch` and decides what its callers see.
    fn settle(&self, key: &str, epoch: u64, ttl: Duration, outcome: Result<Computed<V>>) -> Result<Fetched<V>> {
        let mut state = self.state.lock();
        state.release_pending(key, epoch);
        let superseded = state.is_superseded(key, epoch);

        match outcome {
            Ok(computed) => {
                let freshness = if computed.stale_input {
                    Freshness::StaleInput
                } else {
                    Freshness::Fresh
                };
                let stored_at = state.store.now();

                if superseded {
                    state.stats.record_superseded();
                    debug!(key = %key, epoch, "Discarding result of superseded fetch");
                } else {
                    state
                        .store
                        .set_derived(key, computed.value.clone(), ttl, computed.stale_input);
                    let total = state.store.len();
                    state.stats.set_total_entries(total);
                }

                Ok(Fetched {
                    value: computed.value,
                    freshness,
                    stored_at,
                })
            }
            Err(err) => {
                state.stats.record_fetch_failure();
                let fallback = state
                    .store
                    .get(key)
                    .map(|entry| (entry.value.clone(), entry.stored_at));

                match fallback {
                    Some((value, stored_at)) => {
                        state.stats.record_stale_served();
                        warn!(key = %key, error = %err, "Refresh failed, serving stale value");
                        Ok(Fetched {
                            value,
                            freshness: Freshness::Stale,
                            stored_at,
                        })
                    }
                    None => {
                        warn!(key = %key, error = %err, "Fetch failed with no fallback value");
                        Err(err)
                    }
                }
            }
        }
    }

    // == Invalidate ==
    /// Removes cached entries and detaches in-flight fetches for `keys`.
    ///
    /// A detached fetch still answers the callers that joined it, but its
    /// result never reaches the store. Returns the number of entries removed.
    pub fn invalidate<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut state = self.state.lock();
        let floor = state.next_epoch;
        let mut removed = 0;

        for key in keys {
            let key = key.as_ref();
            removed += state.store.invalidate([key]);
            if state.pending.remove(key).is_some() {
                debug!(key = %key, "Detached in-flight fetch");
            }
            state.floors.insert(key.to_string(), floor);
        }

        state.stats.record_invalidations(removed);
        let total = state.store.len();
        state.stats.set_total_entries(total);
        removed
    }

    /// Drops every entry and detaches every in-flight fetch.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let floor = state.next_epoch;
        state.global_floor = floor;
        state.pending.clear();
        let removed = state.store.clear();
        state.stats.record_invalidations(removed);
        state.stats.set_total_entries(0);
        removed
    }

    /// Whether `key` currently holds a valid entry.
    pub fn is_valid(&self, key: &str) -> bool {
        self.state.lock().store.is_valid(key)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let mut pending_keys: Vec<String> = state.pending.keys().cloned().collect();
        pending_keys.sort();

        let mut stats = state.stats.clone();
        stats.set_total_entries(state.store.len());

        Snapshot {
            cached_keys: state.store.keys(),
            pending_keys,
            last_updated: state.store.last_updated(),
            stats,
        }
    }
}

fn release_after_crash<V>(state: &Weak<Mutex<State<V>>>, key: &str, epoch: u64) {
    if let Some(state) = state.upgrade() {
        state.lock().release_pending(key, epoch);
    }
}
