//! Timeout-bounded document store wrapper
//!
//! A slow store degrades single requests instead of stalling the server. The
//! inner future is dropped when the budget elapses; there is no retry.

use async_trait::async_trait;
use serde_json::Value;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use super::{Collection, DocumentStore, Filter, FindOptions, StoreError, StoreResult};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TimedDocumentStore {
    inner: Arc<dyn DocumentStore>,
    limit: Duration,
}

impl TimedDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T, F>(&self, op: &'static str, collection: Collection, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        match timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed_ms = self.limit.as_millis() as u64;
                warn!(
                    collection = %collection,
                    elapsed_ms,
                    "document store {} timed out",
                    op
                );
                Err(StoreError::Timeout { elapsed_ms })
            }
        }
    }
}

#[async_trait]
impl DocumentStore for TimedDocumentStore {
    async fn find_by_id(&self, collection: Collection, id: Uuid) -> StoreResult<Value> {
        self.bounded("find_by_id", collection, self.inner.find_by_id(collection, id))
            .await
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Value> {
        self.bounded(
            "find_by_field",
            collection,
            self.inner.find_by_field(collection, field, value),
        )
        .await
    }

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
        opts: FindOptions,
    ) -> StoreResult<Vec<Value>> {
        self.bounded(
            "find_many",
            collection,
            self.inner.find_many(collection, filter, opts),
        )
        .await
    }

    async fn insert_one(&self, collection: Collection, doc: Value) -> StoreResult<Uuid> {
        self.bounded("insert_one", collection, self.inner.insert_one(collection, doc))
            .await
    }

    async fn update_one(&self, collection: Collection, id: Uuid, doc: Value) -> StoreResult<u64> {
        self.bounded(
            "update_one",
            collection,
            self.inner.update_one(collection, id, doc),
        )
        .await
    }

    async fn delete_one(&self, collection: Collection, id: Uuid) -> StoreResult<u64> {
        self.bounded("delete_one", collection, self.inner.delete_one(collection, id))
            .await
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        self.bounded("count", collection, self.inner.count(collection, filter))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;
    use serde_json::json;

    /// Store whose reads never complete.
    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        async fn find_by_id(&self, _: Collection, _: Uuid) -> StoreResult<Value> {
            std::future::pending().await
        }
        async fn find_by_field(&self, _: Collection, _: &str, _: &Value) -> StoreResult<Value> {
            std::future::pending().await
        }
        async fn find_many(&self, _: Collection, _: &Filter, _: FindOptions) -> StoreResult<Vec<Value>> {
            std::future::pending().await
        }
        async fn insert_one(&self, _: Collection, _: Value) -> StoreResult<Uuid> {
            std::future::pending().await
        }
        async fn update_one(&self, _: Collection, _: Uuid, _: Value) -> StoreResult<u64> {
            std::future::pending().await
        }
        async fn delete_one(&self, _: Collection, _: Uuid) -> StoreResult<u64> {
            std::future::pending().await
        }
        async fn count(&self, _: Collection, _: &Filter) -> StoreResult<u64> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let store = TimedDocumentStore::new(Arc::new(StalledStore), Duration::from_millis(20));
        let err = store
            .find_by_id(Collection::Accounts, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { elapsed_ms: 20 }));
    }

    #[tokio::test]
    async fn test_fast_store_passes_through() {
        let inner = Arc::new(MemoryDocumentStore::new());
        let store = TimedDocumentStore::new(inner, DEFAULT_STORE_TIMEOUT);
        let id = Uuid::new_v4();

        store
            .insert_one(Collection::Roles, json!({ "id": id }))
            .await
            .unwrap();
        assert_eq!(store.count(Collection::Roles, &Filter::All).await.unwrap(), 1);
        assert!(store
            .find_by_id(Collection::Roles, Uuid::new_v4())
            .await
            .unwrap_err()
            .is_not_found());
    }
}
