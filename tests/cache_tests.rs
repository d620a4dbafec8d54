//! Integration tests for the TTL cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;

use docstore_cache::store::memory::MemoryStore;
use docstore_cache::store::DocumentData;
use docstore_cache::{BatchOperationHelper, CacheManager, Document, DocumentRef, DocumentStore};

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_share_one_fetch() {
    let cache: CacheManager<String> = CacheManager::new(Duration::from_secs(60));
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..10).map(|_| {
        let calls = calls.clone();
        cache.get_or_fetch("profile/42", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Some("ada".to_string()))
        })
    });
    let results = join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.as_deref() == Some("ada")));

    let stats = cache.stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.ttl_seconds, 60);
}

#[tokio::test(start_paused = true)]
async fn test_coalesced_failure_reaches_every_caller_as_none() {
    let cache: CacheManager<u64> = CacheManager::new(Duration::from_secs(60));
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..5).map(|_| {
        let calls = calls.clone();
        cache.get_or_fetch("k", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(anyhow::anyhow!("503 from backend"))
        })
    });
    let results = join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(Option::is_none));
    assert_eq!(cache.stats().pending_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_boundary() {
    let cache = CacheManager::new(Duration::from_secs(30));
    cache.set("k", "v");

    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(cache.get("k"), Some("v"));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get("k"), None);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_refetched() {
    let cache: CacheManager<u32> = CacheManager::new(Duration::from_secs(5));
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let c = calls.clone();
        cache
            .get_or_fetch("k", move || async move { Ok(Some(c.fetch_add(1, Ordering::SeqCst) as u32)) })
            .await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    let c = calls.clone();
    let value = cache
        .get_or_fetch("k", move || async move { Ok(Some(c.fetch_add(1, Ordering::SeqCst) as u32)) })
        .await;
    assert_eq!(value, Some(1));
}

async fn read_profiles(
    batch: BatchOperationHelper,
    refs: Vec<DocumentRef>,
) -> anyhow::Result<Option<Vec<Document>>> {
    let mut found = Vec::new();
    for (_, result) in batch.batch_read(&refs).await {
        if let Some(doc) = result? {
            found.push(doc);
        }
    }
    found.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(Some(found))
}

#[tokio::test]
async fn test_cache_fetcher_backed_by_batch_read() {
    let store = MemoryStore::new();
    let refs: Vec<DocumentRef> = (0..3)
        .map(|i| DocumentRef::doc("friends", &format!("f{i}")).unwrap())
        .collect();
    for (i, r) in refs.iter().enumerate() {
        let mut data = DocumentData::new();
        data.insert("rank".into(), json!(i));
        store.put(r, data);
    }

    let backend: Arc<dyn DocumentStore> = Arc::new(store.clone());
    let batch = BatchOperationHelper::new(backend);
    let cache: CacheManager<Vec<Document>> = CacheManager::new(Duration::from_secs(60));

    for _ in 0..3 {
        let batch = batch.clone();
        let refs = refs.clone();
        let docs = cache
            .get_or_fetch("friends-of/u1", move || read_profiles(batch, refs))
            .await
            .unwrap();
        assert_eq!(docs.len(), 3);
    }

    // One batch read of three documents; later calls were cache hits.
    assert_eq!(store.read_count(), 3);

    // A write invalidates the cached list.
    cache.remove("friends-of/u1");
    assert!(cache.get("friends-of/u1").is_none());
}
