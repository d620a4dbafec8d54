//! docstore-cache: client-side data-access layer for remote document stores.
//!
//! Cuts round trips and backend read/write cost while keeping data reasonably
//! fresh. A read can pass through several layers before it reaches the store:
//!   prefetch buffer → TTL cache → paginated or batched store access
//!
//! The components do not call each other. They compose through the fetch
//! closures the caller hands them, e.g. a cache whose fetcher goes through
//! the batch executor.

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod pagination;
pub mod prefetch;
pub mod store;

pub use batch::{BatchOperation, BatchOperationHelper};
pub use cache::{CacheManager, CacheStats};
pub use config::Config;
pub use error::{Error, Result};
pub use pagination::{LazyLoadingController, PageState};
pub use prefetch::{DataPrefetcher, PrefetchOptions};
pub use store::{Document, DocumentRef, DocumentStore, Query, StoreError};
