//! In-memory document store used by tests and the `memory` backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    document_id, Collection, DocumentStore, Filter, FindOptions, StoreError, StoreResult,
};

type CollectionMap = BTreeMap<Uuid, Value>;

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<RwLock<HashMap<Collection, CollectionMap>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_by_id(&self, collection: Collection, id: Uuid) -> StoreResult<Value> {
        self.collections
            .read()
            .get(&collection)
            .and_then(|docs| docs.get(&id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Value> {
        let filter = Filter::Eq {
            field: field.to_string(),
            value: value.clone(),
        };
        self.collections
            .read()
            .get(&collection)
            .and_then(|docs| docs.values().find(|doc| filter.matches(doc)))
            .cloned()
            .ok_or_else(|| StoreError::not_found(collection, format!("{field}={value}")))
    }

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
        opts: FindOptions,
    ) -> StoreResult<Vec<Value>> {
        let guard = self.collections.read();
        let Some(docs) = guard.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(opts.apply(docs.values().filter(|doc| filter.matches(doc)).cloned()))
    }

    async fn insert_one(&self, collection: Collection, doc: Value) -> StoreResult<Uuid> {
        let id = document_id(&doc)?;
        let mut guard = self.collections.write();
        let docs = guard.entry(collection).or_default();
        if docs.contains_key(&id) {
            return Err(StoreError::InvalidDocument(format!(
                "duplicate id {id} in {collection}"
            )));
        }
        docs.insert(id, doc);
        Ok(id)
    }

    async fn update_one(&self, collection: Collection, id: Uuid, doc: Value) -> StoreResult<u64> {
        let mut guard = self.collections.write();
        match guard.get_mut(&collection).and_then(|docs| docs.get_mut(&id)) {
            Some(slot) => {
                *slot = doc;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_one(&self, collection: Collection, id: Uuid) -> StoreResult<u64> {
        let mut guard = self.collections.write();
        let removed = guard
            .get_mut(&collection)
            .and_then(|docs| docs.remove(&id))
            .is_some();
        Ok(u64::from(removed))
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        let guard = self.collections.read();
        let count = guard
            .get(&collection)
            .map(|docs| docs.values().filter(|doc| filter.matches(doc)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }
}
