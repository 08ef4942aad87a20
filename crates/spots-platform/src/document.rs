use std::{cmp::Ordering, fmt};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use spots_core::{PlatformCode, ServiceError};

/// Field map of one document.
pub type Fields = Map<String, Value>;

const SERVER_TIMESTAMP_KEY: &str = "__serverTimestamp__";

/// Placeholder resolved to the commit time (epoch milliseconds) by the store.
pub fn server_timestamp() -> Value {
    let mut marker = Map::new();
    marker.insert(SERVER_TIMESTAMP_KEY.to_owned(), Value::Bool(true));
    Value::Object(marker)
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .get(SERVER_TIMESTAMP_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Address of a document: a (possibly nested) collection path plus an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: String,
    id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of a subcollection nested under this document.
    pub fn subcollection(&self, name: &str) -> String {
        format!("{}/{}/{name}", self.collection, self.id)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Document read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub fields: Fields,
}

impl DocumentSnapshot {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|err| {
            ServiceError::platform(
                PlatformCode::InvalidArgument,
                format!("malformed document {}: {err}", self.path),
            )
        })
    }
}

/// Serialize a value into a document field map.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, ServiceError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(ServiceError::platform(
            PlatformCode::InvalidArgument,
            format!("document body must be an object, got {other}"),
        )),
        Err(err) => Err(ServiceError::platform(
            PlatformCode::InvalidArgument,
            format!("document body is not serializable: {err}"),
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Equality-filtered, optionally ordered query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: String,
    filters: Vec<(String, Value)>,
    order_by: Option<(String, SortDirection)>,
    limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection_path(&self) -> &str {
        &self.collection
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| fields.get(field) == Some(expected))
    }

    /// Sort snapshots by the query's ordering; documents missing the field sort first.
    pub fn sort(&self, docs: &mut [DocumentSnapshot]) {
        let Some((field, direction)) = &self.order_by else {
            return;
        };
        docs.sort_by(|a, b| {
            let ordering = compare_values(a.fields.get(field), b.fields.get(field));
            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    /// Replace the whole document.
    #[default]
    Overwrite,
    /// Deep-merge the given fields into the existing document.
    Merge,
}

/// Read-modify-write context handed to a transaction body.
///
/// All reads must happen before the first write.
pub trait Transaction {
    fn get(&mut self, path: &DocumentPath) -> Result<Option<DocumentSnapshot>, ServiceError>;

    fn set(&mut self, path: &DocumentPath, fields: Fields) -> Result<(), ServiceError>;

    /// Merge fields into an existing document; the commit fails if it is missing.
    fn update(&mut self, path: &DocumentPath, fields: Fields) -> Result<(), ServiceError>;
}

/// Body of a transaction. The store may run it more than once on write conflict,
/// so it must not perform side effects outside the transaction.
pub type TransactionBody<'a> =
    dyn FnMut(&mut dyn Transaction) -> Result<(), ServiceError> + Send + 'a;

/// Document database collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(
        &self,
        path: &DocumentPath,
    ) -> Result<Option<DocumentSnapshot>, ServiceError>;

    async fn query_documents(&self, query: &Query) -> Result<Vec<DocumentSnapshot>, ServiceError>;

    async fn set_document(
        &self,
        path: &DocumentPath,
        fields: Fields,
        mode: SetMode,
    ) -> Result<(), ServiceError>;

    async fn update_document(
        &self,
        path: &DocumentPath,
        fields: Fields,
    ) -> Result<(), ServiceError>;

    async fn delete_document(&self, path: &DocumentPath) -> Result<(), ServiceError>;

    async fn add_document(
        &self,
        collection: &str,
        fields: Fields,
    ) -> Result<DocumentPath, ServiceError>;

    /// Reserve a fresh document id without writing anything.
    fn new_document_path(&self, collection: &str) -> DocumentPath;

    /// Run `body` with serializable isolation and commit its writes atomically.
    async fn run_transaction(&self, body: &mut TransactionBody<'_>) -> Result<(), ServiceError>;
}

/// Deep-merge `patch` into `target`: nested objects merge, everything else replaces.
pub fn merge_fields(target: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming))
                if !incoming.contains_key(SERVER_TIMESTAMP_KEY) =>
            {
                merge_fields(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}
