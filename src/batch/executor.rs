//! Chunked batch executor.
//!
//! Writes are split into consecutive chunks of at most `max_chunk_size`
//! operations. Chunks commit strictly one after another; the first failed
//! commit stops the batch and is returned to the caller together with how much
//! was already committed. There is no atomicity across chunks.
//!
//! Reads carry no ordering constraint and are issued concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::stream::{self, Stream};
use tracing::{debug, info, warn};

use crate::batch::{BatchOperation, DEFAULT_MAX_CHUNK_SIZE};
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::store::{Document, DocumentData, DocumentRef, DocumentStore, Query, StoreError};

/// Outcome of a single read inside [`BatchOperationHelper::batch_read`].
pub type ReadResult = std::result::Result<Option<Document>, StoreError>;

/// Executes bulk reads and writes within the store's per-transaction limit.
#[derive(Clone)]
pub struct BatchOperationHelper {
    store: Arc<dyn DocumentStore>,
    max_chunk_size: usize,
}

impl BatchOperationHelper {
    /// Create a helper using the default chunk size.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &BatchConfig) -> Self {
        Self::new(store).with_max_chunk_size(config.max_chunk_size)
    }

    /// Override the chunk size. Values below 1 are raised to 1.
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size.max(1);
        self
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Apply `operations` in order, one transaction per chunk.
    pub async fn execute_batch(&self, operations: Vec<BatchOperation>) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }

        let total_operations = operations.len();
        let total_chunks = total_operations.div_ceil(self.max_chunk_size);
        let started = Instant::now();

        let mut remaining = operations.into_iter();
        let mut committed_operations = 0;

        for chunk in 0..total_chunks {
            let mut txn = self.store.transaction();
            for op in remaining.by_ref().take(self.max_chunk_size) {
                txn.apply(op);
            }
            let chunk_len = txn.len();

            if let Err(source) = txn.commit().await {
                warn!(
                    chunk,
                    total_chunks,
                    committed_operations,
                    error = %source,
                    "Batch chunk failed to commit, abandoning remaining chunks"
                );
                return Err(Error::ChunkCommit {
                    chunk,
                    total_chunks,
                    committed_operations,
                    source,
                });
            }

            committed_operations += chunk_len;
            debug!(chunk, total_chunks, operations = chunk_len, "Committed batch chunk");
        }

        info!(
            operations = total_operations,
            chunks = total_chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch complete"
        );
        Ok(())
    }

    /// Read every reference concurrently. The result has one entry per
    /// distinct path; per-document failures are reported in place.
    pub async fn batch_read(&self, refs: &[DocumentRef]) -> HashMap<String, ReadResult> {
        let reads = refs.iter().map(|reference| {
            let store = self.store.clone();
            async move {
                let result = store.get(reference).await;
                if let Err(e) = &result {
                    debug!(path = %reference, error = %e, "Batch read failed");
                }
                (reference.path().to_string(), result)
            }
        });

        join_all(reads).await.into_iter().collect()
    }

    /// Write (or merge) each document.
    pub async fn batch_set(&self, writes: Vec<(DocumentRef, DocumentData)>, merge: bool) -> Result<()> {
        let operations = writes
            .into_iter()
            .map(|(reference, data)| BatchOperation::Write {
                reference,
                data,
                merge,
            })
            .collect();
        self.execute_batch(operations).await
    }

    /// Merge the same fields into every referenced document.
    pub async fn batch_update(&self, refs: &[DocumentRef], data: &DocumentData) -> Result<()> {
        let operations = refs
            .iter()
            .map(|reference| BatchOperation::update(reference.clone(), data.clone()))
            .collect();
        self.execute_batch(operations).await
    }

    pub async fn batch_delete(&self, refs: &[DocumentRef]) -> Result<()> {
        let operations = refs
            .iter()
            .cloned()
            .map(BatchOperation::delete)
            .collect();
        self.execute_batch(operations).await
    }

    /// Lazily page through `query`, `page_size` documents at a time.
    ///
    /// Each page is requested strictly after the last document of the
    /// previous one. The stream ends after the first short page; an empty
    /// page is never yielded. A query error is yielded once and ends the
    /// stream. Calling this again starts over from the beginning.
    pub fn get_paginated_documents(
        &self,
        query: Query,
        page_size: usize,
    ) -> impl Stream<Item = std::result::Result<Vec<Document>, StoreError>> + Send + 'static {
        let store = self.store.clone();
        let page_size = page_size.max(1);

        // Outer None: exhausted. Inner: cursor to resume after.
        let start: Option<Option<Document>> = Some(None);

        stream::unfold(start, move |state| {
            let store = store.clone();
            let query = query.clone();
            async move {
                let cursor = state?;
                match store.query(&query, cursor.as_ref(), page_size).await {
                    Ok(page) if page.is_empty() => None,
                    Ok(page) => {
                        let next = if page.len() < page_size {
                            None
                        } else {
                            page.last().cloned().map(Some)
                        };
                        debug!(
                            collection = %query.collection,
                            documents = page.len(),
                            more = next.is_some(),
                            "Fetched page"
                        );
                        Some((Ok(page), next))
                    }
                    Err(e) => {
                        warn!(collection = %query.collection, error = %e, "Page query failed");
                        Some((Err(e), None))
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use futures::StreamExt;
    use serde_json::json;

    fn fields(n: i64) -> DocumentData {
        let mut data = DocumentData::new();
        data.insert("n".into(), json!(n));
        data
    }

    fn seeded(count: usize) -> (MemoryStore, BatchOperationHelper) {
        let store = MemoryStore::new();
        for i in 0..count {
            store.put(&DocumentRef::doc("items", &format!("{i:04}")).unwrap(), fields(i as i64));
        }
        let helper = BatchOperationHelper::new(Arc::new(store.clone()));
        (store, helper)
    }

    #[tokio::test]
    async fn test_empty_batch_commits_nothing() {
        let (store, helper) = seeded(0);
        helper.execute_batch(Vec::new()).await.unwrap();
        assert_eq!(store.commit_attempts(), 0);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_chunk_size() {
        let (store, helper) = seeded(0);
        let helper = helper.with_max_chunk_size(10);
        let ops = (0..30)
            .map(|i| BatchOperation::write(DocumentRef::doc("items", &i.to_string()).unwrap(), fields(i)))
            .collect();
        helper.execute_batch(ops).await.unwrap();
        assert_eq!(store.commit_sizes(), vec![10, 10, 10]);
        assert_eq!(store.document_count("items"), 30);
    }

    #[tokio::test]
    async fn test_chunk_size_floor() {
        let (_, helper) = seeded(0);
        assert_eq!(helper.with_max_chunk_size(0).max_chunk_size(), 1);
    }

    #[tokio::test]
    async fn test_update_of_missing_document_fails_its_chunk() {
        let (store, helper) = seeded(3);
        let refs: Vec<_> = ["0000", "0001", "nope"]
            .iter()
            .map(|id| DocumentRef::doc("items", id).unwrap())
            .collect();

        let err = helper.batch_update(&refs, &fields(99)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ChunkCommit {
                chunk: 0,
                committed_operations: 0,
                source: StoreError::NotFound(_),
                ..
            }
        ));
        // The chunk is atomic, so the valid updates were not applied either.
        let doc = store.get(&refs[0]).await.unwrap().unwrap();
        assert_eq!(doc.get("n"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_paginated_stream_stops_on_short_page() {
        let (store, helper) = seeded(7);
        let pages: Vec<_> = helper
            .get_paginated_documents(Query::collection("items"), 3)
            .collect()
            .await;

        let sizes: Vec<_> = pages.iter().map(|p| p.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn test_paginated_stream_exact_multiple_ends_on_empty_page() {
        let (store, helper) = seeded(6);
        let pages: Vec<_> = helper
            .get_paginated_documents(Query::collection("items"), 3)
            .collect()
            .await;

        assert_eq!(pages.len(), 2);
        // The third query returns nothing and is not yielded.
        assert_eq!(store.query_count(), 3);
    }
}
