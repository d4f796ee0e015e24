#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use ares_backend::{
    auth::{jwt::TokenKeys, Account, MemorySessionCache, PasswordHasher, TokenCodec},
    config::{SessionTransport, StoreBackend},
    rbac::Permission,
    store::{DocumentStore, Documents, MemoryDocumentStore},
    AppState, Config,
};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use jsonwebtoken::Algorithm;
use serde_json::Value;
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"integration-access-secret-000001";
pub const REFRESH_SECRET: &[u8] = b"integration-refresh-secret-00001";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub backend: Arc<dyn DocumentStore>,
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(
        TokenKeys::hmac(Algorithm::HS256, ACCESS_SECRET, Duration::from_secs(900)).unwrap(),
        TokenKeys::hmac(Algorithm::HS256, REFRESH_SECRET, Duration::from_secs(86_400)).unwrap(),
    )
}

pub fn spawn_app(transport: SessionTransport) -> TestApp {
    let mut config = Config::default();
    config.auth.session_transport = transport;
    config.auth.bcrypt_cost = 4;
    config.store.backend = StoreBackend::Memory;

    let backend: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let state = AppState::from_parts(
        Arc::new(config),
        backend.clone(),
        MemorySessionCache::new(),
        codec(),
    );
    let router = state.router();

    TestApp {
        state,
        router,
        backend,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    /// Inserts an account directly, bypassing registration.
    pub async fn seed_account(&self, username: &str, password: &str, permissions: &[Permission]) -> Account {
        let hash = PasswordHasher::new(4).hash(password).unwrap();
        let mut account = Account::new_standard(username, format!("{username}@example.com"), hash);
        account.permissions = permissions.to_vec();
        Documents::<Account>::new(self.backend.clone())
            .insert(&account)
            .await
            .unwrap();
        account
    }

    pub async fn account(&self, id: uuid::Uuid) -> Account {
        Documents::<Account>::new(self.backend.clone())
            .find_by_id(id)
            .await
            .unwrap()
    }

    /// Logs in and returns `(access, refresh)`.
    pub async fn login(&self, email: &str, password: &str) -> (String, String) {
        let (status, body) = self
            .send(json_request(
                "POST",
                "/v1/auth",
                serde_json::json!({ "email": email, "password": password }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        (
            body["token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn bearer_json_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
