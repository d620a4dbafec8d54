//! In-process document store.
//!
//! Behaves like a remote document database as far as the data-access layer can
//! tell: transactions are atomic per commit and capped in size, queries are
//! ordered and cursor-driven. It also records what it was asked to do so tests
//! can assert on round trips and commit boundaries.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::batch::{BatchOperation, DEFAULT_MAX_CHUNK_SIZE};
use crate::store::{Document, DocumentData, DocumentRef, DocumentStore, Query, StoreError, Transaction};

#[derive(Debug, Default)]
struct State {
    /// Collection path -> document id -> data.
    collections: HashMap<String, BTreeMap<String, DocumentData>>,

    /// Size of every successful commit, in order.
    commit_sizes: Vec<usize>,

    /// Commit attempts, successful or not.
    commit_attempts: usize,

    /// Zero-based commit attempt that should fail.
    fail_commit_at: Option<usize>,

    read_count: usize,
    query_count: usize,
    read_delay: Duration,
}

impl State {
    fn lookup(&self, reference: &DocumentRef) -> Option<&DocumentData> {
        self.collections
            .get(reference.collection())
            .and_then(|docs| docs.get(reference.id()))
    }
}

/// Shared, cloneable in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    max_operations: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_operation_limit(DEFAULT_MAX_CHUNK_SIZE)
    }

    /// Create a store that rejects commits holding more than `max_operations`.
    pub fn with_operation_limit(max_operations: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_operations,
        }
    }

    /// Store a document directly, outside any transaction.
    pub fn put(&self, reference: &DocumentRef, data: DocumentData) {
        self.state
            .lock()
            .collections
            .entry(reference.collection().to_string())
            .or_default()
            .insert(reference.id().to_string(), data);
    }

    /// Store a document under a freshly generated id.
    pub fn add(&self, collection: &str, data: DocumentData) -> Result<DocumentRef, StoreError> {
        let reference = DocumentRef::doc(collection, &Uuid::new_v4().simple().to_string())?;
        self.put(&reference, data);
        Ok(reference)
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Sizes of all successful commits, in commit order.
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.state.lock().commit_sizes.clone()
    }

    /// Commit attempts, including failed ones.
    pub fn commit_attempts(&self) -> usize {
        self.state.lock().commit_attempts
    }

    /// Make the `n`-th commit attempt (zero-based, counted from store
    /// creation) fail with [`StoreError::Aborted`].
    pub fn fail_commit_at(&self, n: usize) {
        self.state.lock().fail_commit_at = Some(n);
    }

    /// Point reads served so far.
    pub fn read_count(&self) -> usize {
        self.state.lock().read_count
    }

    /// Queries served so far.
    pub fn query_count(&self) -> usize {
        self.state.lock().query_count
    }

    /// Simulated latency for reads and queries.
    pub fn set_read_delay(&self, delay: Duration) {
        self.state.lock().read_delay = delay;
    }

    fn commit_operations(&self, operations: Vec<BatchOperation>) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let attempt = state.commit_attempts;
        state.commit_attempts += 1;

        if operations.len() > self.max_operations {
            return Err(StoreError::TooManyOperations {
                limit: self.max_operations,
                actual: operations.len(),
            });
        }
        if state.fail_commit_at == Some(attempt) {
            return Err(StoreError::Aborted(format!("injected failure on commit {attempt}")));
        }

        // Stage into an overlay so a failing operation leaves the store untouched.
        let mut staged: HashMap<DocumentRef, Option<DocumentData>> = HashMap::new();
        for op in &operations {
            let current = match staged.get(op.reference()) {
                Some(doc) => doc.clone(),
                None => state.lookup(op.reference()).cloned(),
            };

            let next = match op {
                BatchOperation::Write {
                    data, merge: true, ..
                } => {
                    let mut merged = current.unwrap_or_default();
                    merged.extend(data.clone());
                    Some(merged)
                }
                BatchOperation::Write { data, .. } => Some(data.clone()),
                BatchOperation::Update { reference, data } => {
                    let mut existing =
                        current.ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
                    existing.extend(data.clone());
                    Some(existing)
                }
                BatchOperation::Delete { .. } => None,
            };
            staged.insert(op.reference().clone(), next);
        }

        for (reference, doc) in staged {
            let collection = state
                .collections
                .entry(reference.collection().to_string())
                .or_default();
            match doc {
                Some(data) => {
                    collection.insert(reference.id().to_string(), data);
                }
                None => {
                    collection.remove(reference.id());
                }
            }
        }

        state.commit_sizes.push(operations.len());
        debug!(attempt, operations = operations.len(), "Committed transaction");
        Ok(())
    }

    async fn simulate_latency(&self) {
        let delay = self.state.lock().read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Write batch against a [`MemoryStore`].
pub struct MemoryTransaction {
    store: MemoryStore,
    operations: Vec<BatchOperation>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn apply(&mut self, operation: BatchOperation) {
        self.operations.push(operation);
    }

    fn len(&self) -> usize {
        self.operations.len()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { store, operations } = *self;
        store.commit_operations(operations)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn transaction(&self) -> Box<dyn Transaction> {
        Box::new(MemoryTransaction {
            store: self.clone(),
            operations: Vec::new(),
        })
    }

    async fn get(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.read_count += 1;
        Ok(state
            .lookup(reference)
            .map(|data| Document::new(reference.clone(), data.clone())))
    }

    async fn query(
        &self,
        query: &Query,
        start_after: Option<&Document>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.query_count += 1;

        let Some(docs) = state.collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut ordered: Vec<Document> = docs
            .iter()
            .map(|(id, data)| {
                DocumentRef::doc(&query.collection, id)
                    .map(|reference| Document::new(reference, data.clone()))
            })
            .collect::<Result<_, _>>()?;
        ordered.sort_by(|a, b| compare_documents(query, a, b));

        let start = match start_after {
            Some(cursor) => ordered
                .iter()
                .position(|doc| compare_documents(query, doc, cursor) == Ordering::Greater)
                .unwrap_or(ordered.len()),
            None => 0,
        };

        Ok(ordered.into_iter().skip(start).take(limit).collect())
    }
}

/// Total order used by queries: the ordered field first, document id second.
fn compare_documents(query: &Query, a: &Document, b: &Document) -> Ordering {
    let by_field = match &query.order_by {
        Some(field) => {
            let ord = compare_values(a.get(field), b.get(field));
            if query.descending {
                ord.reverse()
            } else {
                ord
            }
        }
        None => Ordering::Equal,
    };
    by_field.then_with(|| a.id().cmp(b.id()))
}

/// Missing < null < bool < number < string < array < object.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
