//! Speculative prefetching: fetch data before it is demanded and park the
//! result until a demand read picks it up.
//!
//! Every prefetch runs as a background task, so starting one never blocks the
//! caller. Results land in a buffer that [`DataPrefetcher::get_or_fetch`]
//! consumes. A prefetch that fails or exceeds its timeout resolves to `None`
//! and the demand read falls back to fetching directly.
//!
//! Timeouts and cancellation only abandon a fetch: the fetch future keeps
//! running on the runtime, but its result is no longer buffered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PrefetchConfig;

/// Type-erased fetcher, for handing a heterogeneous set of fetches to
/// [`DataPrefetcher::prefetch_batch`].
pub type Fetcher<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Option<T>>> + Send>;

type SharedFetch<T> = Shared<BoxFuture<'static, Option<T>>>;

/// Per-call scheduling options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchOptions {
    /// Higher starts earlier within a batch.
    pub priority: i32,
    /// Overrides the configured timeout.
    pub timeout: Option<Duration>,
}

impl PrefetchOptions {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct PrefetchTask<T> {
    id: u64,
    priority: i32,
    started_at: Instant,
    future: SharedFetch<T>,
}

/// A completed result and the task that produced it.
struct Buffered<T> {
    task_id: u64,
    value: T,
}

struct State<T> {
    /// Completed, not yet consumed results.
    buffer: HashMap<String, Buffered<T>>,
    tasks: HashMap<String, PrefetchTask<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    config: PrefetchConfig,
    next_task_id: AtomicU64,
}

enum Lookup<T> {
    Buffered(T),
    InFlight(SharedFetch<T>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefetchStats {
    /// Results waiting in the buffer.
    pub prefetched: usize,
    pub in_flight: usize,
    /// In-flight keys, highest priority first, then oldest first.
    pub in_flight_keys: Vec<String>,
}

/// Priority-ordered background fetcher with a single-use result buffer.
///
/// Must be used from within a Tokio runtime. Cloning yields another handle to
/// the same scheduler.
pub struct DataPrefetcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DataPrefetcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DataPrefetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    buffer: HashMap::new(),
                    tasks: HashMap::new(),
                }),
                config,
                next_task_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start fetching `key` in the background.
    ///
    /// The work begins immediately; the returned future only observes its
    /// outcome and may be dropped. A buffered result is returned as-is
    /// (without consuming it) and an in-flight fetch for the same key is
    /// joined rather than duplicated.
    pub fn prefetch<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: PrefetchOptions,
    ) -> BoxFuture<'static, Option<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        match self.schedule(key, fetcher, options) {
            Lookup::Buffered(value) => future::ready(Some(value)).boxed(),
            Lookup::InFlight(task) => task.boxed(),
        }
    }

    /// Demand read.
    ///
    /// Takes the buffered result if there is one, otherwise waits for an
    /// in-flight prefetch of `key`, otherwise (or if the prefetch came back
    /// empty) calls `fetcher` directly under `timeout`. Direct fetch failures
    /// are logged and yield `None`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        timeout: Option<Duration>,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let consume = self.inner.config.consume_on_read;

        let in_flight = {
            let mut state = self.inner.state.lock();
            let buffered = if consume {
                state.buffer.remove(key).map(|entry| entry.value)
            } else {
                state.buffer.get(key).map(|entry| entry.value.clone())
            };
            if let Some(value) = buffered {
                debug!(key, "Prefetch hit");
                return Some(value);
            }
            state.tasks.get(key).map(|task| (task.id, task.future.clone()))
        };

        if let Some((task_id, task)) = in_flight {
            debug!(key, "Waiting on in-flight prefetch");
            if let Some(value) = task.await {
                if consume {
                    // Only consume what the awaited task buffered; a newer
                    // prefetch of the same key keeps its result.
                    let mut state = self.inner.state.lock();
                    if state.buffer.get(key).is_some_and(|entry| entry.task_id == task_id) {
                        state.buffer.remove(key);
                    }
                }
                return Some(value);
            }
            debug!(key, "Prefetch yielded nothing, fetching directly");
        }

        let timeout = timeout.unwrap_or_else(|| self.inner.config.timeout());
        match tokio::time::timeout(timeout, fetcher()).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(key, error = %e, "Direct fetch failed");
                None
            }
            Err(_) => {
                warn!(key, timeout_ms = timeout.as_millis() as u64, "Direct fetch timed out");
                None
            }
        }
    }

    /// Fire off every fetcher without waiting for any of them. Tasks are
    /// dispatched in descending priority (missing priorities count as 0);
    /// priority does not preempt tasks that are already running.
    pub fn prefetch_batch(&self, fetchers: HashMap<String, Fetcher<T>>, priorities: &HashMap<String, i32>) {
        let mut ordered: Vec<(String, Fetcher<T>, i32)> = fetchers
            .into_iter()
            .map(|(key, fetcher)| {
                let priority = priorities.get(&key).copied().unwrap_or_default();
                (key, fetcher, priority)
            })
            .collect();
        ordered.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

        debug!(tasks = ordered.len(), "Dispatching prefetch batch");
        for (key, fetcher, priority) in ordered {
            self.schedule(&key, fetcher, PrefetchOptions::default().priority(priority));
        }
    }

    /// Forget the buffered result and in-flight task for `key`. A running
    /// fetch is not aborted, but its result will not be buffered.
    pub fn cancel(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.buffer.remove(key);
        if state.tasks.remove(key).is_some() {
            debug!(key, "Prefetch cancelled");
        }
    }

    pub fn cancel_all(&self) {
        let mut state = self.inner.state.lock();
        state.buffer.clear();
        state.tasks.clear();
    }

    /// Drop buffered results; in-flight tasks are left alone.
    pub fn clear_cache(&self) {
        self.inner.state.lock().buffer.clear();
    }

    pub fn is_prefetched(&self, key: &str) -> bool {
        self.inner.state.lock().buffer.contains_key(key)
    }

    pub fn is_prefetching(&self, key: &str) -> bool {
        self.inner.state.lock().tasks.contains_key(key)
    }

    pub fn stats(&self) -> PrefetchStats {
        let state = self.inner.state.lock();
        let mut tasks: Vec<(&String, &PrefetchTask<T>)> = state.tasks.iter().collect();
        tasks.sort_by(|a, b| {
            b.1.priority
                .cmp(&a.1.priority)
                .then_with(|| a.1.started_at.cmp(&b.1.started_at))
        });

        PrefetchStats {
            prefetched: state.buffer.len(),
            in_flight: tasks.len(),
            in_flight_keys: tasks.into_iter().map(|(key, _)| key.clone()).collect(),
        }
    }

    fn schedule<F, Fut>(&self, key: &str, fetcher: F, options: PrefetchOptions) -> Lookup<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let timeout = options.timeout.unwrap_or_else(|| self.inner.config.timeout());

        let task = {
            let mut state = self.inner.state.lock();
            if let Some(entry) = state.buffer.get(key) {
                return Lookup::Buffered(entry.value.clone());
            }
            if let Some(task) = state.tasks.get(key) {
                return Lookup::InFlight(task.future.clone());
            }

            let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
            let future = Self::run(Arc::clone(&self.inner), key.to_string(), id, timeout, fetcher)
                .boxed()
                .shared();
            state.tasks.insert(
                key.to_string(),
                PrefetchTask {
                    id,
                    priority: options.priority,
                    started_at: Instant::now(),
                    future: future.clone(),
                },
            );
            future
        };

        debug!(key, priority = options.priority, "Prefetch started");
        tokio::spawn(task.clone());
        Lookup::InFlight(task)
    }

    /// Body of a prefetch task.
    async fn run<F, Fut>(
        inner: Arc<Inner<T>>,
        key: String,
        id: u64,
        timeout: Duration,
        fetcher: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let started = Instant::now();

        // The fetch gets its own task so that a timeout drops only our handle.
        let fetch = tokio::spawn(fetcher());
        let outcome = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(Ok(value))) => value,
            Ok(Ok(Err(e))) => {
                warn!(key = %key, error = %e, "Prefetch failed");
                None
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Prefetch task panicked");
                None
            }
            Err(_) => {
                warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Prefetch timed out");
                None
            }
        };

        let mut state = inner.state.lock();
        if state.tasks.get(&key).is_some_and(|task| task.id == id) {
            state.tasks.remove(&key);
            if let Some(value) = &outcome {
                debug!(key = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Prefetch buffered"
                );
                state.buffer.insert(
                    key,
                    Buffered {
                        task_id: id,
                        value: value.clone(),
                    },
                );
            }
        }

        outcome
    }
}
