//! Batch operation types.

use serde::{Deserialize, Serialize};

use crate::store::{DocumentData, DocumentRef};

/// A single write staged into a [`Transaction`](crate::store::Transaction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchOperation {
    /// Create or overwrite a document. With `merge`, fields are merged into
    /// an existing document instead of replacing it.
    Write {
        reference: DocumentRef,
        data: DocumentData,
        merge: bool,
    },
    /// Merge fields into a document that must already exist.
    Update {
        reference: DocumentRef,
        data: DocumentData,
    },
    /// Delete a document. Deleting a missing document is not an error.
    Delete { reference: DocumentRef },
}

impl BatchOperation {
    pub fn write(reference: DocumentRef, data: DocumentData) -> Self {
        BatchOperation::Write {
            reference,
            data,
            merge: false,
        }
    }

    pub fn merge(reference: DocumentRef, data: DocumentData) -> Self {
        BatchOperation::Write {
            reference,
            data,
            merge: true,
        }
    }

    pub fn update(reference: DocumentRef, data: DocumentData) -> Self {
        BatchOperation::Update { reference, data }
    }

    pub fn delete(reference: DocumentRef) -> Self {
        BatchOperation::Delete { reference }
    }

    /// The document this operation targets.
    pub fn reference(&self) -> &DocumentRef {
        match self {
            BatchOperation::Write { reference, .. }
            | BatchOperation::Update { reference, .. }
            | BatchOperation::Delete { reference } => reference,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchOperation::Write { merge: false, .. } => "write",
            BatchOperation::Write { merge: true, .. } => "merge",
            BatchOperation::Update { .. } => "update",
            BatchOperation::Delete { .. } => "delete",
        }
    }
}
