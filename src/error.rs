//! Error types for the data-access layer.
//!
//! Fetch failures inside the cache and the prefetcher never surface here: they
//! are logged and reported to callers as a missing value. Only hard failures
//! that callers must act on (a batch chunk that failed to commit, a broken
//! configuration) are returned as errors.

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The backing store rejected a read or query.
    #[error("backing store error: {0}")]
    Store(#[from] StoreError),

    /// A batch chunk failed to commit. Earlier chunks stay committed.
    #[error(
        "chunk {chunk} of {total_chunks} failed to commit \
         ({committed_operations} operations already committed): {source}"
    )]
    ChunkCommit {
        /// Zero-based index of the failed chunk.
        chunk: usize,
        total_chunks: usize,
        /// Operations applied by the chunks that committed before the failure.
        committed_operations: usize,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Operations that reached the backing store before this error, if the
    /// error came out of a chunked batch.
    pub fn committed_operations(&self) -> Option<usize> {
        match self {
            Error::ChunkCommit {
                committed_operations,
                ..
            } => Some(*committed_operations),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_commit_reports_progress() {
        let err = Error::ChunkCommit {
            chunk: 1,
            total_chunks: 3,
            committed_operations: 500,
            source: StoreError::Unavailable("connection reset".into()),
        };

        assert_eq!(err.committed_operations(), Some(500));
        let msg = err.to_string();
        assert!(msg.contains("chunk 1 of 3"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: Error = StoreError::NotFound("users/missing".into()).into();
        assert!(matches!(err, Error::Store(StoreError::NotFound(_))));
        assert_eq!(err.committed_operations(), None);
    }
}
