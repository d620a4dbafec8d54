//! TTL cache with in-flight request coalescing.
//!
//! `get_or_fetch` serves a live entry when there is one. Otherwise all callers
//! asking for the same key while a fetch is outstanding share that single
//! fetch: the first caller registers a pending request and every later caller
//! awaits the same shared future. When the fetch settles its value is cached
//! (unless the key was invalidated meanwhile) and the pending request is
//! dropped, whether it succeeded or not.
//!
//! Fetch failures never reach callers; they are logged and read as a miss.
//! The fetch runs as a Tokio task, so the cache must be used from within a
//! Tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;

type SharedFetch<T> = Shared<BoxFuture<'static, Option<T>>>;

/// A cached value and the instant it stops being served.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// The outstanding fetch for a key. `id` tells a settling fetch whether it is
/// still the registered one or has been invalidated.
struct PendingRequest<T> {
    id: u64,
    future: SharedFetch<T>,
}

struct State<T> {
    entries: HashMap<String, CacheEntry<T>>,
    pending: HashMap<String, PendingRequest<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    ttl: Duration,
    next_request_id: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Stored entries, including expired ones not purged yet.
    pub size: usize,
    /// Fetches currently in flight.
    pub pending_count: usize,
    pub ttl_seconds: u64,
}

/// Key/value cache with per-entry expiry and coalesced population.
///
/// Cloning yields another handle to the same cache.
pub struct CacheManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CacheManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> CacheManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    pending: HashMap::new(),
                }),
                ttl,
                next_request_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Return the live value for `key`. An expired entry is removed and
    /// reported as absent.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut state = self.inner.state.lock();
        Self::live_value(&mut state, key, Instant::now())
    }

    /// Store `value` with a fresh TTL, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: T) {
        let expires_at = Instant::now() + self.inner.ttl;
        self.inner
            .state
            .lock()
            .entries
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Return the live value for `key`, or populate it with `fetcher`.
    ///
    /// Concurrent callers for the same key run `fetcher` once and all receive
    /// its outcome. `fetcher` errors are logged and yield `None`; an `Ok(None)`
    /// result is passed through and not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetcher: F) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let fetch = {
            let mut state = self.inner.state.lock();

            if let Some(value) = Self::live_value(&mut state, key, Instant::now()) {
                debug!(key, "Cache hit");
                return Some(value);
            }

            match state.pending.get(key) {
                Some(pending) => {
                    debug!(key, "Joining in-flight fetch");
                    pending.future.clone()
                }
                None => {
                    debug!(key, "Cache miss, fetching");
                    let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
                    let future = Self::populate(Arc::clone(&self.inner), key.to_string(), id, fetcher)
                        .boxed()
                        .shared();
                    state.pending.insert(
                        key.to_string(),
                        PendingRequest {
                            id,
                            future: future.clone(),
                        },
                    );
                    // Driven by the runtime so the key settles even if every caller goes away.
                    tokio::spawn(future.clone());
                    future
                }
            }
        };

        fetch.await
    }

    /// Drop the entry for `key` and forget any in-flight fetch for it, so the
    /// fetch's result is not written back.
    pub fn remove(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.entries.remove(key);
        state.pending.remove(key);
    }

    /// Drop every entry and forget every in-flight fetch.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.entries.clear();
        state.pending.clear();
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        before - state.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            size: state.entries.len(),
            pending_count: state.pending.len(),
            ttl_seconds: self.inner.ttl.as_secs(),
        }
    }

    fn live_value(state: &mut State<T>, key: &str, now: Instant) -> Option<T> {
        match state.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                debug!(key, "Cache entry expired");
                state.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Body of the shared fetch: run the fetcher, then settle the key.
    async fn populate<F, Fut>(inner: Arc<Inner<T>>, key: String, id: u64, fetcher: F) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        // The fetch gets its own task so that a panicking fetcher still settles the key.
        let outcome = match tokio::spawn(fetcher()).await {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::anyhow!("fetch task failed: {e}")),
        };

        let mut state = inner.state.lock();
        let registered = state.pending.get(&key).is_some_and(|p| p.id == id);
        if registered {
            state.pending.remove(&key);
        }

        match outcome {
            Ok(Some(value)) => {
                if registered {
                    let expires_at = Instant::now() + inner.ttl;
                    state.entries.insert(
                        key,
                        CacheEntry {
                            value: value.clone(),
                            expires_at,
                        },
                    );
                } else {
                    debug!(key = %key, "Key invalidated during fetch, result not cached");
                }
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Fetch failed, treating as miss");
                None
            }
        }
    }
}
