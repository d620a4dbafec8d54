//! Integration tests for the bounded batch executor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use docstore_cache::store::memory::MemoryStore;
use docstore_cache::store::{DocumentData, Transaction};
use docstore_cache::{
    BatchOperation, BatchOperationHelper, Document, DocumentRef, DocumentStore, Error, Query,
    StoreError,
};

fn doc_ref(id: usize) -> DocumentRef {
    DocumentRef::doc("items", &format!("{id:05}")).unwrap()
}

fn fields(n: usize) -> DocumentData {
    let mut data = DocumentData::new();
    data.insert("n".into(), json!(n));
    data
}

fn writes(count: usize) -> Vec<BatchOperation> {
    (0..count).map(|i| BatchOperation::write(doc_ref(i), fields(i))).collect()
}

fn helper(store: &MemoryStore) -> BatchOperationHelper {
    BatchOperationHelper::new(Arc::new(store.clone()))
}

#[tokio::test]
async fn test_chunks_commit_in_order() {
    let store = MemoryStore::new();
    helper(&store).execute_batch(writes(1234)).await.unwrap();

    assert_eq!(store.commit_sizes(), vec![500, 500, 234]);
    assert_eq!(store.document_count("items"), 1234);
}

#[tokio::test]
async fn test_failed_chunk_stops_the_batch() {
    let store = MemoryStore::new();
    store.fail_commit_at(1);

    let err = helper(&store).execute_batch(writes(1234)).await.unwrap_err();
    match err {
        Error::ChunkCommit {
            chunk,
            total_chunks,
            committed_operations,
            source,
        } => {
            assert_eq!(chunk, 1);
            assert_eq!(total_chunks, 3);
            assert_eq!(committed_operations, 500);
            assert!(matches!(source, StoreError::Aborted(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The third chunk was never attempted; the first stays committed.
    assert_eq!(store.commit_attempts(), 2);
    assert_eq!(store.commit_sizes(), vec![500]);
    assert_eq!(store.document_count("items"), 500);
}

#[tokio::test]
async fn test_unchunked_write_exceeds_store_limit() {
    let store = MemoryStore::new();
    let mut txn = store.transaction();
    for op in writes(501) {
        txn.apply(op);
    }
    let err = txn.commit().await.unwrap_err();
    assert_eq!(err, StoreError::TooManyOperations { limit: 500, actual: 501 });
}

#[tokio::test]
async fn test_update_and_delete_wrappers() {
    let store = MemoryStore::new();
    let batch = helper(&store).with_max_chunk_size(4);
    batch.execute_batch(writes(10)).await.unwrap();

    let refs: Vec<_> = (0..10).map(doc_ref).collect();
    let mut flag = DocumentData::new();
    flag.insert("archived".into(), json!(true));
    batch.batch_update(&refs, &flag).await.unwrap();

    let doc = store.get(&refs[7]).await.unwrap().unwrap();
    assert_eq!(doc.get("n"), Some(&json!(7)));
    assert_eq!(doc.get("archived"), Some(&json!(true)));

    batch.batch_delete(&refs[..6]).await.unwrap();
    assert_eq!(store.document_count("items"), 4);
    assert_eq!(store.commit_sizes(), vec![4, 4, 2, 4, 4, 2, 4, 2]);
}

#[tokio::test]
async fn test_batch_set_merge() {
    let store = MemoryStore::new();
    let batch = helper(&store);
    batch.execute_batch(writes(3)).await.unwrap();

    let mut extra = DocumentData::new();
    extra.insert("tag".into(), json!("x"));
    batch
        .batch_set((0..3).map(|i| (doc_ref(i), extra.clone())).collect(), true)
        .await
        .unwrap();

    let doc = store.get(&doc_ref(2)).await.unwrap().unwrap();
    assert_eq!(doc.get("n"), Some(&json!(2)));
    assert_eq!(doc.get("tag"), Some(&json!("x")));
}

/// Store wrapper whose reads finish in reverse order of their document ids.
struct ReverseLatencyStore {
    inner: MemoryStore,
}

#[async_trait]
impl DocumentStore for ReverseLatencyStore {
    fn transaction(&self) -> Box<dyn Transaction> {
        self.inner.transaction()
    }

    async fn get(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError> {
        let id: u64 = reference.id().parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(100 - id * 10)).await;
        self.inner.get(reference).await
    }

    async fn query(
        &self,
        query: &Query,
        start_after: Option<&Document>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.query(query, start_after, limit).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_read_keys_every_ref_by_path() {
    let store = MemoryStore::new();
    for i in 0..8 {
        store.put(&doc_ref(i), fields(i));
    }
    let batch = BatchOperationHelper::new(Arc::new(ReverseLatencyStore {
        inner: store.clone(),
    }));

    let refs: Vec<_> = (0..10).map(doc_ref).collect();
    let started = tokio::time::Instant::now();
    let results = batch.batch_read(&refs).await;

    assert_eq!(results.len(), 10);
    for (i, r) in refs.iter().enumerate() {
        let found = results[r.path()].as_ref().unwrap();
        assert_eq!(found.is_some(), i < 8, "unexpected result for {r}");
    }
    // Reads overlapped: total time is the slowest read, not the sum.
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(store.read_count(), 10);
}

#[tokio::test]
async fn test_paginated_documents_tolerate_concurrent_inserts() {
    let store = MemoryStore::new();
    for i in (0..20).step_by(2) {
        store.put(&doc_ref(i), fields(i));
    }
    let batch = helper(&store);

    let pages = batch.get_paginated_documents(Query::collection("items"), 4);
    futures::pin_mut!(pages);

    let mut seen = Vec::new();
    let mut first = true;
    while let Some(page) = pages.next().await {
        let page = page.unwrap();
        assert!(!page.is_empty());
        seen.extend(page.iter().map(|d| d.id().to_string()));
        if first {
            // One insert behind the cursor, one ahead of it.
            store.put(&doc_ref(1), fields(1));
            store.put(&doc_ref(15), fields(15));
            first = false;
        }
    }

    let unique: HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len(), "a document was returned twice");
    assert_eq!(seen.len(), 11);
    assert!(seen.contains(&"00015".to_string()));
    assert!(!seen.contains(&"00001".to_string()));
}

#[tokio::test]
async fn test_paginated_documents_restart_from_beginning() {
    let store = MemoryStore::new();
    for i in 0..5 {
        store.put(&doc_ref(i), fields(i));
    }
    let batch = helper(&store);

    for _ in 0..2 {
        let pages: Vec<_> = batch
            .get_paginated_documents(Query::collection("items").order_by("n").descending(), 2)
            .collect()
            .await;
        let first = pages[0].as_ref().unwrap();
        assert_eq!(first[0].id(), "00004");
        assert_eq!(pages.len(), 3);
    }
}
