//! Incremental list loading.
//!
//! A [`LazyLoadingController`] owns the state of one list view: the items
//! loaded so far, the next page index and whether more pages exist. Pages are
//! requested strictly in order and at most one request is outstanding.
//!
//! State lives in a `tokio::sync::watch` channel; every transition is
//! published to subscribers.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::PaginationConfig;

/// Fetches page `page` (zero-based) holding up to `page_size` items.
pub type PageFetcher<T> =
    Arc<dyn Fn(usize, usize) -> BoxFuture<'static, anyhow::Result<Vec<T>>> + Send + Sync>;

/// Where a list is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadPhase {
    Empty,
    Loading,
    Loaded,
    Errored,
}

/// Snapshot of a paginated list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageState<T> {
    pub items: Vec<T>,
    /// Index of the next page to request.
    pub current_page: usize,
    pub has_more: bool,
    pub is_loading: bool,
    /// Description of the last failed page request.
    pub error: Option<String>,
}

impl<T> Default for PageState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            current_page: 0,
            has_more: true,
            is_loading: false,
            error: None,
        }
    }
}

impl<T> PageState<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn phase(&self) -> LoadPhase {
        if self.is_loading {
            LoadPhase::Loading
        } else if self.error.is_some() {
            LoadPhase::Errored
        } else if self.current_page == 0 && self.items.is_empty() {
            LoadPhase::Empty
        } else {
            LoadPhase::Loaded
        }
    }
}

pub struct LazyLoadingController<T> {
    fetch_page: PageFetcher<T>,
    page_size: usize,
    state: watch::Sender<PageState<T>>,
    /// Bumped on every reset; a page that returns under an older epoch is dropped.
    epoch: AtomicU64,
}

impl<T> LazyLoadingController<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a controller. A `page_size` of 0 is raised to 1.
    pub fn new<F, Fut>(page_size: usize, fetch_page: F) -> Self
    where
        F: Fn(usize, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        let fetch_page: PageFetcher<T> = Arc::new(move |page, size| fetch_page(page, size).boxed());
        let (state, _) = watch::channel(PageState::default());
        Self {
            fetch_page,
            page_size: page_size.max(1),
            state,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn from_config<F, Fut>(config: &PaginationConfig, fetch_page: F) -> Self
    where
        F: Fn(usize, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        Self::new(config.page_size, fetch_page)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reset to an empty list and load the first page.
    pub async fn load_initial(&self) {
        self.reset();
        self.load_more().await;
    }

    /// Pull-to-refresh; same as [`load_initial`](Self::load_initial).
    pub async fn refresh(&self) {
        self.load_initial().await;
    }

    /// Load the next page. Does nothing while a page is loading or after the
    /// last page. On failure the error is recorded and items are left as they
    /// were, so calling again retries the same page.
    pub async fn load_more(&self) {
        let mut request = None;
        self.state.send_if_modified(|state| {
            if state.is_loading || !state.has_more {
                return false;
            }
            state.is_loading = true;
            state.error = None;
            request = Some((state.current_page, self.epoch.load(Ordering::SeqCst)));
            true
        });

        let Some((page, epoch)) = request else {
            debug!("load_more skipped: loading or exhausted");
            return;
        };

        debug!(page, page_size = self.page_size, "Loading page");
        let result = (self.fetch_page)(page, self.page_size).await;
        let page_size = self.page_size;

        self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!(page, "List was reset while loading, dropping page");
                return false;
            }

            state.is_loading = false;
            match result {
                Ok(items) => {
                    state.has_more = items.len() >= page_size;
                    state.items.extend(items);
                    state.current_page += 1;
                }
                Err(e) => {
                    warn!(page, error = %e, "Page fetch failed");
                    state.error = Some(format!("{e:#}"));
                }
            }
            true
        });
    }

    /// Reset to the empty state without fetching.
    pub fn clear(&self) {
        self.reset();
    }

    /// Append an item locally.
    pub fn add_item(&self, item: T) {
        self.state.send_modify(|state| state.items.push(item));
    }

    /// Insert an item locally at `index` (clamped to the list length).
    pub fn insert_item(&self, index: usize, item: T) {
        self.state.send_modify(|state| {
            let index = index.min(state.items.len());
            state.items.insert(index, item);
        });
    }

    /// Remove the first item equal to `item`. Returns whether one was found.
    pub fn remove_item(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.state.send_if_modified(|state| {
            match state.items.iter().position(|existing| existing == item) {
                Some(index) => {
                    state.items.remove(index);
                    true
                }
                None => false,
            }
        })
    }

    /// Replace the first item equal to `old`. Returns whether one was found.
    pub fn update_item(&self, old: &T, new: T) -> bool
    where
        T: PartialEq,
    {
        self.state.send_if_modified(|state| {
            match state.items.iter_mut().find(|existing| *existing == old) {
                Some(slot) => {
                    *slot = new;
                    true
                }
                None => false,
            }
        })
    }

    /// Observe every state change.
    pub fn subscribe(&self) -> watch::Receiver<PageState<T>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PageState<T> {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.state.borrow().items.clone()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.state.borrow().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn current_page(&self) -> usize {
        self.state.borrow().current_page
    }

    pub fn phase(&self) -> LoadPhase {
        self.state.borrow().phase()
    }

    fn reset(&self) {
        self.state.send_modify(|state| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *state = PageState::default();
        });
    }
}
