//! Backing-store seam.
//!
//! The data-access layer never talks to a concrete database. Everything it
//! needs from one is captured here:
//! - [`DocumentRef`] / [`Document`]: path-addressed JSON documents
//! - [`Query`]: an ordered view over one collection
//! - [`Transaction`]: a write batch that is atomic on commit
//! - [`DocumentStore`]: point reads, cursor queries and transaction creation
//!
//! [`memory::MemoryStore`] is an in-process implementation.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::batch::BatchOperation;

/// JSON object body of a document.
pub type DocumentData = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid document path: {0:?}")]
    InvalidPath(String),

    #[error("transaction holds {actual} operations, limit is {limit}")]
    TooManyOperations { limit: usize, actual: usize },

    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction aborted: {0}")]
    Aborted(String),
}

/// Identifies a document by its slash-separated path (`collection/id`,
/// optionally nested as `users/u1/friends/f7`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    /// Parse a document path. It must have an even, non-zero number of
    /// non-empty segments.
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 2 || segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty())
        {
            return Err(StoreError::InvalidPath(path));
        }
        Ok(Self { path })
    }

    /// Build a reference from a collection path and a document id.
    pub fn doc(collection: &str, id: &str) -> Result<Self, StoreError> {
        Self::new(format!("{collection}/{id}"))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the collection containing this document.
    pub fn collection(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map(|(collection, _)| collection)
            .unwrap_or_default()
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map(|(_, id)| id)
            .unwrap_or(self.path.as_str())
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// A document snapshot returned by reads and queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub reference: DocumentRef,
    pub data: DocumentData,
}

impl Document {
    pub fn new(reference: DocumentRef, data: DocumentData) -> Self {
        Self { reference, data }
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn path(&self) -> &str {
        self.reference.path()
    }

    /// Field lookup by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

/// An ordered view over a single collection.
///
/// Documents are ordered by `order_by` (if set) and then by document id, which
/// makes the order total so a `start_after` cursor is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub order_by: Option<String>,
    pub descending: bool,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: None,
            descending: false,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// A pending write batch. Nothing reaches the store until [`commit`](Self::commit),
/// which applies every operation or none of them.
#[async_trait]
pub trait Transaction: Send {
    /// Stage one operation.
    fn apply(&mut self, operation: BatchOperation);

    /// Number of staged operations.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically apply all staged operations.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// The remote document store as seen by the data-access layer.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a new write batch.
    fn transaction(&self) -> Box<dyn Transaction>;

    /// Read a single document; `Ok(None)` when it does not exist.
    async fn get(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError>;

    /// Read up to `limit` documents of `query`, strictly after `start_after`
    /// when given.
    async fn query(
        &self,
        query: &Query,
        start_after: Option<&Document>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;
}
