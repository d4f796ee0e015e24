//! Document Store
//! Mission: Generic JSON document persistence shared by accounts, roles and the audit trail
//!
//! Every operation is individually atomic. Nothing here offers multi-document
//! transactions; callers that touch several documents (the role-deletion sweep)
//! must tolerate partial completion.

pub mod memory;
pub mod sqlite;
pub mod timed;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{fmt, marker::PhantomData, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
pub use timed::TimedDocumentStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} document not found: {key}")]
    NotFound { collection: String, key: String },

    #[error("store operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(collection: impl fmt::Display, key: impl fmt::Display) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Named document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Accounts,
    Roles,
    Audit,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Accounts => "account",
            Collection::Roles => "role",
            Collection::Audit => "audit",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document selection used by `find_many` and `count`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Top-level field equals the value.
    Eq { field: String, value: Value },
    /// Top-level array field holds an element equal to the value.
    Contains { field: String, value: Value },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => doc.get(field) == Some(value),
            Filter::Contains { field, value } => doc
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            skip: 0,
            limit: Some(limit),
        }
    }

    /// Applies skip/limit to an already filtered, ordered sequence.
    pub(crate) fn apply<I: Iterator<Item = Value>>(&self, docs: I) -> Vec<Value> {
        let docs = docs.skip(self.skip);
        match self.limit {
            Some(limit) => docs.take(limit).collect(),
            None => docs.collect(),
        }
    }
}

/// Reads the `id` field every stored document must carry.
pub(crate) fn document_id(doc: &Value) -> StoreResult<Uuid> {
    doc.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| StoreError::InvalidDocument("missing or malformed `id` field".into()))
}

/// Untyped document store contract.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, collection: Collection, id: Uuid) -> StoreResult<Value>;

    /// First document whose top-level `field` equals `value`.
    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Value>;

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
        opts: FindOptions,
    ) -> StoreResult<Vec<Value>>;

    /// Inserts a document carrying its own `id`; returns that id.
    async fn insert_one(&self, collection: Collection, doc: Value) -> StoreResult<Uuid>;

    /// Replaces the document stored under `id`. Returns the modified count.
    async fn update_one(&self, collection: Collection, id: Uuid, doc: Value) -> StoreResult<u64>;

    /// Returns the deleted count.
    async fn delete_one(&self, collection: Collection, id: Uuid) -> StoreResult<u64>;

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64>;
}

/// A serde type stored in one collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn id(&self) -> Uuid;
}

/// Typed view over the collection of `T`.
pub struct Documents<T> {
    store: Arc<dyn DocumentStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Documents<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Documents<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> StoreResult<T> {
        let doc = self.store.find_by_id(T::COLLECTION, id).await?;
        Ok(serde_json::from_value(doc)?)
    }

    pub async fn find_by_field(&self, field: &str, value: impl Into<Value>) -> StoreResult<T> {
        let doc = self
            .store
            .find_by_field(T::COLLECTION, field, &value.into())
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    /// `Ok(None)` when nothing matches; other failures propagate.
    pub async fn find_optional_by_field(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> StoreResult<Option<T>> {
        match self.find_by_field(field, value).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn find_many(&self, filter: &Filter, opts: FindOptions) -> StoreResult<Vec<T>> {
        self.store
            .find_many(T::COLLECTION, filter, opts)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }

    pub async fn insert(&self, doc: &T) -> StoreResult<Uuid> {
        let value = serde_json::to_value(doc)?;
        self.store.insert_one(T::COLLECTION, value).await
    }

    pub async fn update(&self, doc: &T) -> StoreResult<u64> {
        let value = serde_json::to_value(doc)?;
        self.store.update_one(T::COLLECTION, doc.id(), value).await
    }

    pub async fn delete(&self, id: Uuid) -> StoreResult<u64> {
        self.store.delete_one(T::COLLECTION, id).await
    }

    pub async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.store.count(T::COLLECTION, filter).await
    }
}
