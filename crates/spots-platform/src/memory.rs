use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde_json::Value;
use spots_core::{PlatformCode, ServiceError};
use tracing::debug;
use uuid::Uuid;

use crate::document::{
    DocumentPath, DocumentSnapshot, DocumentStore, Fields, Query, SetMode, Transaction,
    TransactionBody, is_server_timestamp, merge_fields,
};

const DEFAULT_MAX_TRANSACTION_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct StoredDocument {
    fields: Fields,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<DocumentPath, StoredDocument>,
    next_version: u64,
    last_timestamp_ms: u64,
}

impl StoreState {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    /// Wall-clock milliseconds, forced strictly increasing across commits.
    fn commit_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let stamp = now.max(self.last_timestamp_ms + 1);
        self.last_timestamp_ms = stamp;
        stamp
    }

    fn snapshot(&self, path: &DocumentPath) -> Option<DocumentSnapshot> {
        self.documents.get(path).map(|doc| DocumentSnapshot {
            path: path.clone(),
            fields: doc.fields.clone(),
        })
    }

    fn version(&self, path: &DocumentPath) -> Option<u64> {
        self.documents.get(path).map(|doc| doc.version)
    }

    fn write(&mut self, path: &DocumentPath, mut fields: Fields, mode: SetMode, stamp: u64) {
        resolve_timestamps(&mut fields, stamp);
        let version = self.bump_version();
        match (mode, self.documents.get_mut(path)) {
            (SetMode::Merge, Some(existing)) => {
                merge_fields(&mut existing.fields, fields);
                existing.version = version;
            }
            _ => {
                self.documents
                    .insert(path.clone(), StoredDocument { fields, version });
            }
        }
    }
}

fn resolve_timestamps(fields: &mut Fields, stamp: u64) {
    for value in fields.values_mut() {
        resolve_value(value, stamp);
    }
}

fn resolve_value(value: &mut Value, stamp: u64) {
    if is_server_timestamp(value) {
        *value = Value::from(stamp);
        return;
    }
    match value {
        Value::Object(fields) => resolve_timestamps(fields, stamp),
        Value::Array(items) => items.iter_mut().for_each(|item| resolve_value(item, stamp)),
        _ => {}
    }
}

fn poisoned() -> ServiceError {
    ServiceError::platform(PlatformCode::Internal, "document store lock poisoned")
}

fn read_state(
    state: &RwLock<StoreState>,
) -> Result<RwLockReadGuard<'_, StoreState>, ServiceError> {
    state.read().map_err(|_| poisoned())
}

fn write_state(
    state: &RwLock<StoreState>,
) -> Result<RwLockWriteGuard<'_, StoreState>, ServiceError> {
    state.write().map_err(|_| poisoned())
}

fn missing_document(path: &DocumentPath) -> ServiceError {
    ServiceError::platform(
        PlatformCode::NotFound,
        format!("no document to update: {path}"),
    )
}

/// Process-local document store with optimistic, version-checked transactions.
///
/// Clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<StoreState>>,
    max_transaction_attempts: u32,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            max_transaction_attempts: DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }

    pub fn with_max_transaction_attempts(mut self, attempts: u32) -> Self {
        self.max_transaction_attempts = attempts.max(1);
        self
    }

    /// Overwrite a document outside any transaction.
    pub fn put(&self, path: &DocumentPath, fields: Fields) -> Result<(), ServiceError> {
        let mut state = write_state(&self.state)?;
        let stamp = state.commit_timestamp();
        state.write(path, fields, SetMode::Overwrite, stamp);
        Ok(())
    }

    /// Number of stored documents across all collections.
    pub fn document_count(&self) -> Result<usize, ServiceError> {
        Ok(read_state(&self.state)?.documents.len())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(
        &self,
        path: &DocumentPath,
    ) -> Result<Option<DocumentSnapshot>, ServiceError> {
        Ok(read_state(&self.state)?.snapshot(path))
    }

    async fn query_documents(&self, query: &Query) -> Result<Vec<DocumentSnapshot>, ServiceError> {
        let mut docs: Vec<DocumentSnapshot> = {
            let state = read_state(&self.state)?;
            state
                .documents
                .iter()
                .filter(|(path, doc)| {
                    path.collection() == query.collection_path() && query.matches(&doc.fields)
                })
                .map(|(path, doc)| DocumentSnapshot {
                    path: path.clone(),
                    fields: doc.fields.clone(),
                })
                .collect()
        };
        query.sort(&mut docs);
        if let Some(limit) = query.limit_value() {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn set_document(
        &self,
        path: &DocumentPath,
        fields: Fields,
        mode: SetMode,
    ) -> Result<(), ServiceError> {
        let mut state = write_state(&self.state)?;
        let stamp = state.commit_timestamp();
        state.write(path, fields, mode, stamp);
        Ok(())
    }

    async fn update_document(
        &self,
        path: &DocumentPath,
        fields: Fields,
    ) -> Result<(), ServiceError> {
        let mut state = write_state(&self.state)?;
        if state.version(path).is_none() {
            return Err(missing_document(path));
        }
        let stamp = state.commit_timestamp();
        state.write(path, fields, SetMode::Merge, stamp);
        Ok(())
    }

    async fn delete_document(&self, path: &DocumentPath) -> Result<(), ServiceError> {
        let mut state = write_state(&self.state)?;
        if state.documents.remove(path).is_some() {
            state.bump_version();
        }
        Ok(())
    }

    async fn add_document(
        &self,
        collection: &str,
        fields: Fields,
    ) -> Result<DocumentPath, ServiceError> {
        let path = self.new_document_path(collection);
        self.set_document(&path, fields, SetMode::Overwrite).await?;
        Ok(path)
    }

    fn new_document_path(&self, collection: &str) -> DocumentPath {
        DocumentPath::new(collection, Uuid::new_v4().simple().to_string())
    }

    async fn run_transaction(&self, body: &mut TransactionBody<'_>) -> Result<(), ServiceError> {
        let attempts = self.max_transaction_attempts.max(1);
        for attempt in 1..=attempts {
            let committed = {
                let mut tx = MemoryTransaction::new(&self.state);
                body(&mut tx)?;
                tx.commit()?
            };
            if committed {
                return Ok(());
            }
            debug!(attempt, attempts, "transaction read stale data; rerunning");
            tokio::task::yield_now().await;
        }
        Err(ServiceError::platform(
            PlatformCode::Aborted,
            format!("transaction aborted after {attempts} conflicting attempts"),
        ))
    }
}

enum PendingWrite {
    Set(DocumentPath, Fields),
    Update(DocumentPath, Fields),
}

struct MemoryTransaction<'a> {
    state: &'a RwLock<StoreState>,
    reads: HashMap<DocumentPath, Option<u64>>,
    writes: Vec<PendingWrite>,
}

impl<'a> MemoryTransaction<'a> {
    fn new(state: &'a RwLock<StoreState>) -> Self {
        Self {
            state,
            reads: HashMap::new(),
            writes: Vec::new(),
        }
    }

    /// Apply buffered writes if nothing read has changed since. `Ok(false)` means
    /// the body must run again.
    fn commit(self) -> Result<bool, ServiceError> {
        let mut state = write_state(self.state)?;
        let stale = self
            .reads
            .iter()
            .any(|(path, seen)| state.version(path) != *seen);
        if stale {
            return Ok(false);
        }

        let mut created: Vec<&DocumentPath> = Vec::new();
        for write in &self.writes {
            match write {
                PendingWrite::Set(path, _) => created.push(path),
                PendingWrite::Update(path, _) => {
                    if state.version(path).is_none() && !created.contains(&path) {
                        return Err(missing_document(path));
                    }
                }
            }
        }

        let stamp = state.commit_timestamp();
        for write in self.writes {
            match write {
                PendingWrite::Set(path, fields) => {
                    state.write(&path, fields, SetMode::Overwrite, stamp)
                }
                PendingWrite::Update(path, fields) => {
                    state.write(&path, fields, SetMode::Merge, stamp)
                }
            }
        }
        Ok(true)
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, path: &DocumentPath) -> Result<Option<DocumentSnapshot>, ServiceError> {
        if !self.writes.is_empty() {
            return Err(ServiceError::platform(
                PlatformCode::InvalidArgument,
                "transaction reads must come before writes",
            ));
        }
        let state = read_state(self.state)?;
        self.reads.insert(path.clone(), state.version(path));
        Ok(state.snapshot(path))
    }

    fn set(&mut self, path: &DocumentPath, fields: Fields) -> Result<(), ServiceError> {
        self.writes.push(PendingWrite::Set(path.clone(), fields));
        Ok(())
    }

    fn update(&mut self, path: &DocumentPath, fields: Fields) -> Result<(), ServiceError> {
        self.writes.push(PendingWrite::Update(path.clone(), fields));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::{SortDirection, server_timestamp};

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(fields) => fields,
            other => panic!("expected object, got {other}"),
        }
    }

    fn counter_path() -> DocumentPath {
        DocumentPath::new("counters", "visits")
    }

    fn read_count(tx: &mut dyn Transaction) -> Result<i64, ServiceError> {
        Ok(tx
            .get(&counter_path())?
            .and_then(|doc| doc.fields.get("count").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    #[tokio::test]
    async fn merge_and_update_modes() {
        let store = InMemoryDocumentStore::new();
        let path = DocumentPath::new("users", "pilot-1");

        store
            .set_document(&path, fields(json!({"bio": "hi"})), SetMode::Merge)
            .await
            .expect("merge creates missing doc");
        store
            .set_document(&path, fields(json!({"cityRegion": "Lisbon"})), SetMode::Merge)
            .await
            .expect("merge into existing doc");

        let doc = store
            .get_document(&path)
            .await
            .expect("get should work")
            .expect("doc exists");
        assert_eq!(Value::Object(doc.fields), json!({"bio": "hi", "cityRegion": "Lisbon"}));

        let err = store
            .update_document(&DocumentPath::new("users", "ghost"), fields(json!({"bio": "x"})))
            .await
            .expect_err("update of missing doc");
        assert_eq!(err.code(), Some(&PlatformCode::NotFound));
    }

    #[tokio::test]
    async fn resolves_server_timestamps_on_write() {
        let store = InMemoryDocumentStore::new();
        let path = store
            .add_document("reviews", fields(json!({"createdAt": server_timestamp()})))
            .await
            .expect("add should work");

        let doc = store
            .get_document(&path)
            .await
            .expect("get should work")
            .expect("doc exists");
        assert!(doc.fields["createdAt"].as_u64().expect("numeric stamp") > 0);
    }

    #[tokio::test]
    async fn queries_filter_sort_and_limit() {
        let store = InMemoryDocumentStore::new();
        for (id, spot, at) in [("a", "s1", 1), ("b", "s1", 3), ("c", "s2", 2), ("d", "s1", 2)] {
            store
                .put(
                    &DocumentPath::new("reviews", id),
                    fields(json!({"spotId": spot, "at": at})),
                )
                .expect("seed");
        }

        let query = Query::collection("reviews")
            .where_eq("spotId", "s1")
            .order_by("at", SortDirection::Descending)
            .limit(2);
        let docs = store.query_documents(&query).await.expect("query");
        let ids: Vec<_> = docs.iter().map(DocumentSnapshot::id).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn counting_a_poisoned_store_fails() {
        let store = InMemoryDocumentStore::new();
        let state = Arc::clone(&store.state);
        let poisoner = std::thread::spawn(move || {
            let _guard = state.write().expect("first lock");
            panic!("writer died while holding the lock");
        });
        assert!(poisoner.join().is_err());

        let err = store
            .document_count()
            .expect_err("poisoned lock must not read as empty");
        assert_eq!(err.code(), Some(&PlatformCode::Internal));
    }

    #[tokio::test]
    async fn deleting_missing_document_is_not_an_error() {
        let store = InMemoryDocumentStore::new();
        store
            .delete_document(&DocumentPath::new("spots", "nope"))
            .await
            .expect("delete should be idempotent");
        assert_eq!(store.document_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn transaction_reruns_after_concurrent_write() {
        let store = InMemoryDocumentStore::new();
        store
            .put(&counter_path(), fields(json!({"count": 1})))
            .expect("seed");

        let interferer = store.clone();
        let mut runs = 0;
        store
            .run_transaction(&mut |tx: &mut dyn Transaction| {
                runs += 1;
                let count = read_count(tx)?;
                if runs == 1 {
                    interferer.put(&counter_path(), fields(json!({"count": 10})))?;
                }
                tx.set(&counter_path(), fields(json!({"count": count + 1})))
            })
            .await
            .expect("transaction should eventually commit");

        assert_eq!(runs, 2);
        let doc = store
            .get_document(&counter_path())
            .await
            .expect("get")
            .expect("doc exists");
        assert_eq!(doc.fields["count"], json!(11));
    }

    #[tokio::test]
    async fn transaction_gives_up_with_aborted() {
        let store = InMemoryDocumentStore::new().with_max_transaction_attempts(3);
        let interferer = store.clone();
        let mut runs = 0;

        let err = store
            .run_transaction(&mut |tx: &mut dyn Transaction| {
                runs += 1;
                let count = read_count(tx)?;
                interferer.put(&counter_path(), fields(json!({"count": runs})))?;
                tx.set(&counter_path(), fields(json!({"count": count + 1})))
            })
            .await
            .expect_err("every attempt conflicts");

        assert_eq!(runs, 3);
        assert_eq!(err.code(), Some(&PlatformCode::Aborted));
        assert!(spots_core::is_transient(&err));
    }

    #[tokio::test]
    async fn failed_body_commits_nothing() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .run_transaction(&mut |tx: &mut dyn Transaction| {
                tx.set(&counter_path(), fields(json!({"count": 1})))?;
                Err(ServiceError::platform(PlatformCode::NotFound, "spot missing"))
            })
            .await
            .expect_err("body failure propagates");

        assert_eq!(err.code(), Some(&PlatformCode::NotFound));
        assert_eq!(store.document_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn reads_after_writes_are_rejected() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .run_transaction(&mut |tx: &mut dyn Transaction| {
                tx.set(&counter_path(), fields(json!({"count": 1})))?;
                tx.get(&counter_path()).map(|_| ())
            })
            .await
            .expect_err("read after write");
        assert_eq!(err.code(), Some(&PlatformCode::InvalidArgument));
    }

    #[tokio::test]
    async fn transactional_update_requires_existing_document() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .run_transaction(&mut |tx: &mut dyn Transaction| {
                tx.update(&counter_path(), fields(json!({"count": 2})))
            })
            .await
            .expect_err("update of missing doc");
        assert_eq!(err.code(), Some(&PlatformCode::NotFound));
    }
}
