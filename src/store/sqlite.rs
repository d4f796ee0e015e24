//! SQLite-backed document store
//! Mission: Persist JSON documents in a single table keyed by (collection, id)
//!
//! Every statement runs on the blocking pool so the caller's timeout can fire
//! while SQLite waits on a lock. String equality and string membership filters
//! are pushed into SQL through the JSON1 functions; any other filter falls back
//! to an in-process scan with the same matching rules as the memory backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    document_id, Collection, DocumentStore, Filter, FindOptions, StoreError, StoreResult,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (collection, id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_documents_created
    ON documents(collection, created_at);

CREATE INDEX IF NOT EXISTS idx_documents_email
    ON documents(collection, json_extract(body, '$.email'));

CREATE INDEX IF NOT EXISTS idx_documents_username
    ON documents(collection, json_extract(body, '$.username'));
"#;

const ORDER_SQL: &str = " ORDER BY created_at, id";

/// Field names interpolated into a JSON path.
fn is_plain_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// WHERE clause for one collection plus its bound parameters.
///
/// `exact` means SQL alone selects exactly the documents `Filter::matches`
/// accepts, so counting and paging can also happen in SQL.
struct Selection {
    clause: String,
    params: Vec<String>,
    exact: bool,
}

impl Selection {
    fn new(collection: Collection, filter: &Filter) -> Self {
        let mut params = vec![collection.as_str().to_string()];
        let mut clause = String::from("collection = ?1");

        let exact = match filter {
            Filter::All => true,
            Filter::Eq {
                field,
                value: Value::String(value),
            } if is_plain_field(field) => {
                clause.push_str(&format!(
                    " AND json_type(body, '$.{field}') = 'text' \
                     AND json_extract(body, '$.{field}') = ?2"
                ));
                params.push(value.clone());
                true
            }
            Filter::Contains {
                field,
                value: Value::String(value),
            } if is_plain_field(field) => {
                clause.push_str(&format!(
                    " AND json_type(body, '$.{field}') = 'array' \
                     AND EXISTS (SELECT 1 FROM json_each(body, '$.{field}') AS item \
                     WHERE item.type = 'text' AND item.value = ?2)"
                ));
                params.push(value.clone());
                true
            }
            _ => false,
        };

        Self {
            clause,
            params,
            exact,
        }
    }

    fn select_sql(&self, opts: FindOptions) -> String {
        let mut sql = format!("SELECT body FROM documents WHERE {}{ORDER_SQL}", self.clause);
        if self.exact && (opts.skip > 0 || opts.limit.is_some()) {
            let limit = opts
                .limit
                .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", opts.skip));
        }
        sql
    }

    fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM documents WHERE {}", self.clause)
    }
}

pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
    busy_timeout: Duration,
}

impl SqliteDocumentStore {
    /// Opens (or creates) the database at `db_path` and applies the schema.
    ///
    /// A statement that waits longer than `busy_timeout` on another
    /// connection's lock fails with [`StoreError::Timeout`].
    pub fn new(db_path: &str, busy_timeout: Duration) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize document schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📦 Document store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            busy_timeout,
        })
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite worker failed: {e}")))?;

        result.map_err(|err| match err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                let elapsed_ms = self.busy_timeout.as_millis() as u64;
                warn!(elapsed_ms, "SQLite lock wait exceeded busy timeout");
                StoreError::Timeout { elapsed_ms }
            }
            other => StoreError::from(other),
        })
    }

    async fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        opts: FindOptions,
    ) -> StoreResult<Vec<Value>> {
        let selection = Selection::new(collection, filter);
        let sql = selection.select_sql(opts);
        let exact = selection.exact;
        let params = selection.params;

        let bodies = self
            .run(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        let docs = bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect::<StoreResult<Vec<Value>>>()?;

        if exact {
            Ok(docs)
        } else {
            Ok(opts.apply(docs.into_iter().filter(|doc| filter.matches(doc))))
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_by_id(&self, collection: Collection, id: Uuid) -> StoreResult<Value> {
        let key = (collection.as_str(), id.to_string());
        let body: Option<String> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![key.0, key.1],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        match body {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Err(StoreError::not_found(collection, id)),
        }
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Value> {
        let filter = Filter::eq(field, value.clone());
        self.select(collection, &filter, FindOptions::limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(collection, format!("{field}={value}")))
    }

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
        opts: FindOptions,
    ) -> StoreResult<Vec<Value>> {
        self.select(collection, filter, opts).await
    }

    async fn insert_one(&self, collection: Collection, doc: Value) -> StoreResult<Uuid> {
        let id = document_id(&doc)?;
        let body = serde_json::to_string(&doc)?;
        let key = (collection.as_str(), id.to_string());

        let changes = self
            .run(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
                    params![key.0, key.1, body],
                )
            })
            .await?;
        if changes == 0 {
            return Err(StoreError::InvalidDocument(format!(
                "duplicate id {id} in {collection}"
            )));
        }
        Ok(id)
    }

    async fn update_one(&self, collection: Collection, id: Uuid, doc: Value) -> StoreResult<u64> {
        let body = serde_json::to_string(&doc)?;
        let key = (collection.as_str(), id.to_string());

        let changes = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
                    params![key.0, key.1, body],
                )
            })
            .await?;
        Ok(changes as u64)
    }

    async fn delete_one(&self, collection: Collection, id: Uuid) -> StoreResult<u64> {
        let key = (collection.as_str(), id.to_string());
        let changes = self
            .run(move |conn| {
                conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![key.0, key.1],
                )
            })
            .await?;
        Ok(changes as u64)
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        let selection = Selection::new(collection, filter);
        if !selection.exact {
            let docs = self.select(collection, filter, FindOptions::default()).await?;
            return Ok(docs.len() as u64);
        }

        let sql = selection.count_sql();
        let params = selection.params;
        let count: i64 = self
            .run(move |conn| {
                conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            })
            .await?;
        Ok(count as u64)
    }
}
