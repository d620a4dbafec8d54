//! Bounded batch execution against the backing store.
//!
//! - [`operation`]: BatchOperation, the unit staged into a transaction
//! - [`executor`]: BatchOperationHelper, chunked writes, concurrent reads and
//!   cursor-driven paging

pub mod executor;
pub mod operation;

pub use executor::BatchOperationHelper;
pub use operation::BatchOperation;

/// Per-transaction operation cap of common document stores.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 500;
