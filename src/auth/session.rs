//! Session Cache
//! Mission: TTL key-value store mapping live refresh tokens to account ids
//!
//! The cache is the only source of refresh-token revocation. An entry past its
//! TTL is invisible to `get` and `delete` whether or not the purge task has
//! removed it yet.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, warn};

pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key not found")]
    NotFound,

    #[error("cache operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<String, CacheError>;

    /// Returns the number of live entries removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, CacheError>;
}

/// Short prefix of a token for log lines.
pub(crate) fn key_hint(key: &str) -> &str {
    let end = key
        .char_indices()
        .nth(12)
        .map(|(idx, _)| idx)
        .unwrap_or(key.len());
    &key[..end]
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process session cache with lazy expiry
#[derive(Clone, Default)]
pub struct MemorySessionCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Periodically purges expired entries until the runtime shuts down.
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired sessions", purged);
                }
            }
        })
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::Unavailable("ttl out of range".into()))?;

        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
            .ok_or(CacheError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        let now = Instant::now();
        let removed = self.entries.write().remove(key);
        Ok(u64::from(removed.is_some_and(|entry| entry.is_live(now))))
    }
}

/// Bounds every call on the wrapped cache with a timeout.
pub struct TimedSessionCache {
    inner: Arc<dyn SessionCache>,
    limit: Duration,
}

impl TimedSessionCache {
    pub fn new(inner: Arc<dyn SessionCache>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T, F>(&self, op: &'static str, key: &str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>> + Send,
    {
        match timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed_ms = self.limit.as_millis() as u64;
                warn!(key = key_hint(key), elapsed_ms, "session cache {} timed out", op);
                Err(CacheError::Timeout { elapsed_ms })
            }
        }
    }
}

#[async_trait]
impl SessionCache for TimedSessionCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.bounded("put", key, self.inner.put(key, value, ttl)).await
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        self.bounded("delete", key, self.inner.delete(key)).await
    }
}
