//! Read-through caching.
//!
//! - [`manager`]: CacheManager, a TTL cache that coalesces concurrent fetches

pub mod manager;

pub use manager::{CacheManager, CacheStats};
