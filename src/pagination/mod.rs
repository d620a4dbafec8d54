//! Paginated list loading.
//!
//! - [`controller`]: LazyLoadingController and the PageState it publishes

pub mod controller;

pub use controller::{LazyLoadingController, LoadPhase, PageFetcher, PageState};
