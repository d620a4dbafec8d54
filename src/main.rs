//! docstore-cache demo driver.
//!
//! Seeds an in-memory document store, then runs each part of the access layer
//! against it and logs what reached the backend:
//!   batch seeding → paginated listing → coalesced reads → prefetch → bulk update

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use futures::future::{join_all, FutureExt};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

use docstore_cache::config::{Cli, Config};
use docstore_cache::prefetch::Fetcher;
use docstore_cache::store::memory::MemoryStore;
use docstore_cache::store::DocumentData;
use docstore_cache::{
    BatchOperationHelper, CacheManager, DataPrefetcher, Document, DocumentRef, DocumentStore,
    LazyLoadingController, Query,
};

const COLLECTION: &str = "profiles";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "docstore_cache=debug"
    } else {
        "docstore_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("docstore-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(page_size) = cli.page_size {
        config.pagination.page_size = page_size;
    }
    config.validate()?;

    info!(
        ttl_secs = config.cache.ttl_secs,
        prefetch_timeout_ms = config.prefetch.timeout_ms,
        page_size = config.pagination.page_size,
        max_chunk_size = config.batch.max_chunk_size,
        "Configuration loaded"
    );

    let store = MemoryStore::new();
    let backend: Arc<dyn DocumentStore> = Arc::new(store.clone());
    let batch = BatchOperationHelper::from_config(backend.clone(), &config.batch);

    // Seed the collection in bounded chunks.
    let writes = (0..cli.documents)
        .map(|i| profile_ref(i).map(|reference| (reference, profile(i))))
        .collect::<anyhow::Result<Vec<_>>>()?;
    batch.batch_set(writes, false).await?;
    info!(
        documents = store.document_count(COLLECTION),
        commits = ?store.commit_sizes(),
        "Seeded collection"
    );

    list_all(&config, backend.clone()).await;
    coalesced_reads(&config, &store, backend.clone()).await;
    prefetched_reads(&config, &store, backend.clone()).await;

    // Bulk update every page of the collection.
    let pages = batch.get_paginated_documents(Query::collection(COLLECTION), config.batch.max_chunk_size);
    futures::pin_mut!(pages);
    let mut updated = 0;
    while let Some(page) = pages.next().await {
        let refs: Vec<DocumentRef> = page?.into_iter().map(|doc| doc.reference).collect();
        let mut fields = DocumentData::new();
        fields.insert("verified".into(), json!(true));
        batch.batch_update(&refs, &fields).await?;
        updated += refs.len();
    }
    info!(updated, commits = store.commit_sizes().len(), "Bulk update complete");

    Ok(())
}

/// Walk the whole collection through a paginated list, the way a list view would.
async fn list_all(config: &Config, backend: Arc<dyn DocumentStore>) {
    // The store pages by cursor; remember the last document of each page.
    let cursor: Arc<Mutex<Option<Document>>> = Arc::new(Mutex::new(None));

    let list = LazyLoadingController::from_config(&config.pagination, move |page, size| {
        fetch_page(backend.clone(), cursor.clone(), page, size)
    });

    list.load_initial().await;
    while list.has_more() {
        list.load_more().await;
        if let Some(error) = list.error() {
            warn!(error = %error, "Listing stopped");
            break;
        }
    }
    info!(items = list.len(), pages = list.current_page(), "Listed collection");
}

/// A burst of identical reads reaches the backend once.
async fn coalesced_reads(config: &Config, store: &MemoryStore, backend: Arc<dyn DocumentStore>) {
    let cache: CacheManager<Document> = CacheManager::from_config(&config.cache);
    let reads_before = store.read_count();

    let Ok(reference) = profile_ref(0) else {
        return;
    };
    let burst = (0..8).map(|_| {
        let backend = backend.clone();
        let reference = reference.clone();
        let cache = cache.clone();
        async move {
            let key = reference.path().to_string();
            cache
                .get_or_fetch(&key, move || fetch_document(backend, reference))
                .await
        }
    });
    let results = join_all(burst).await;

    info!(
        callers = results.len(),
        hits = results.iter().filter(|r| r.is_some()).count(),
        backend_reads = store.read_count() - reads_before,
        stats = ?cache.stats(),
        "Coalesced read burst"
    );
}

/// Warm the next profiles in the background, then read them on demand.
async fn prefetched_reads(config: &Config, store: &MemoryStore, backend: Arc<dyn DocumentStore>) {
    let prefetcher: DataPrefetcher<Document> = DataPrefetcher::new(config.prefetch.clone());

    let mut fetchers: HashMap<String, Fetcher<Document>> = HashMap::new();
    let mut priorities = HashMap::new();
    for i in 1..=5 {
        let Ok(reference) = profile_ref(i) else {
            continue;
        };
        let key = reference.path().to_string();
        let backend = backend.clone();
        priorities.insert(key.clone(), 10 - i as i32);
        fetchers.insert(key, Box::new(move || fetch_document(backend, reference).boxed()));
    }
    prefetcher.prefetch_batch(fetchers, &priorities);

    let reads_before = store.read_count();
    let mut served = 0;
    for i in 1..=5 {
        let Ok(reference) = profile_ref(i) else {
            continue;
        };
        let backend = backend.clone();
        let key = reference.path().to_string();
        if prefetcher
            .get_or_fetch(&key, move || fetch_document(backend, reference), None)
            .await
            .is_some()
        {
            served += 1;
        }
    }

    info!(
        served,
        backend_reads = store.read_count() - reads_before,
        stats = ?prefetcher.stats(),
        "Prefetched reads"
    );
}

async fn fetch_page(
    backend: Arc<dyn DocumentStore>,
    cursor: Arc<Mutex<Option<Document>>>,
    page: usize,
    size: usize,
) -> anyhow::Result<Vec<Document>> {
    let after = if page == 0 { None } else { cursor.lock().clone() };
    let docs = backend
        .query(&Query::collection(COLLECTION), after.as_ref(), size)
        .await?;
    if let Some(last) = docs.last() {
        *cursor.lock() = Some(last.clone());
    }
    Ok(docs)
}

async fn fetch_document(
    backend: Arc<dyn DocumentStore>,
    reference: DocumentRef,
) -> anyhow::Result<Option<Document>> {
    Ok(backend.get(&reference).await?)
}

fn profile_ref(i: usize) -> anyhow::Result<DocumentRef> {
    Ok(DocumentRef::doc(COLLECTION, &format!("user-{i:05}"))?)
}

fn profile(i: usize) -> DocumentData {
    let mut data = DocumentData::new();
    data.insert("display_name".into(), json!(format!("User {i}")));
    data.insert("friends".into(), json!(i % 17));
    data
}
