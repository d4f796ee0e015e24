//! Application Assembly
//! Mission: Wire store, cache, codec and services into one axum router

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::audit::AuditLog;
use crate::auth::{
    api as auth_api, AuthService, AuthState, MemorySessionCache, PasswordHasher, SessionCache,
    TimedSessionCache, TokenCodec,
};
use crate::config::{Config, StoreBackend};
use crate::middleware::request_logging;
use crate::rbac::{api as rbac_api, PermissionResolver, RoleAdmin};
use crate::store::{
    DocumentStore, Documents, MemoryDocumentStore, SqliteDocumentStore, TimedDocumentStore,
};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Shared services built once at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DocumentStore>,
    pub sessions: MemorySessionCache,
    pub codec: Arc<TokenCodec>,
    pub auth: Arc<AuthService>,
    pub resolver: Arc<PermissionResolver>,
    pub roles: Arc<RoleAdmin>,
}

impl AppState {
    /// Opens the configured store backend and assembles every service.
    pub fn build(config: Arc<Config>) -> Result<Self> {
        let backend: Arc<dyn DocumentStore> = match config.store.backend {
            StoreBackend::Memory => {
                info!("🧠 Using in-memory document store");
                Arc::new(MemoryDocumentStore::new())
            }
            StoreBackend::Sqlite => Arc::new(
                SqliteDocumentStore::new(&config.store.path, config.store.timeout())
                    .with_context(|| format!("Failed to open store at {}", config.store.path))?,
            ),
        };
        let codec = TokenCodec::from_config(&config.auth).context("Failed to load token keys")?;

        Ok(Self::from_parts(config, backend, MemorySessionCache::new(), codec))
    }

    /// Assembles services over an already-open store and cache.
    pub fn from_parts(
        config: Arc<Config>,
        backend: Arc<dyn DocumentStore>,
        sessions: MemorySessionCache,
        codec: TokenCodec,
    ) -> Self {
        let store: Arc<dyn DocumentStore> =
            Arc::new(TimedDocumentStore::new(backend, config.store.timeout()));
        let cache: Arc<dyn SessionCache> = Arc::new(TimedSessionCache::new(
            Arc::new(sessions.clone()),
            config.cache.timeout(),
        ));
        let codec = Arc::new(codec);
        let audit = AuditLog::new(store.clone());

        let accounts = Documents::new(store.clone());
        let roles = Documents::new(store.clone());
        let resolver = Arc::new(PermissionResolver::new(accounts.clone(), roles.clone()));

        let auth = Arc::new(AuthService::new(
            accounts.clone(),
            cache,
            codec.clone(),
            PasswordHasher::new(config.auth.bcrypt_cost),
            audit.clone(),
        ));
        let role_admin = Arc::new(RoleAdmin::new(accounts, roles, resolver.clone(), audit));

        Self {
            config,
            store,
            sessions,
            codec,
            auth,
            resolver,
            roles: role_admin,
        }
    }

    pub fn router(&self) -> Router {
        let auth_state = AuthState::new(
            self.auth.clone(),
            self.config.auth.session_transport,
            self.config.auth.cookie_domain.clone(),
        );

        Router::new()
            .route("/health", get(health_check))
            .merge(auth_api::router(auth_state))
            .merge(rbac_api::router(
                self.roles.clone(),
                self.resolver.clone(),
                self.codec.clone(),
            ))
            .layer(middleware::from_fn(request_logging))
            .layer(CorsLayer::permissive())
    }
}
