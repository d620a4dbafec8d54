//! Speculative background fetching.
//!
//! - [`prefetcher`]: DataPrefetcher, priority-ordered prefetch tasks feeding a
//!   single-use result buffer

pub mod prefetcher;

pub use prefetcher::{DataPrefetcher, Fetcher, PrefetchOptions, PrefetchStats};
