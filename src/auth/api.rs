//! Authentication API Endpoints
//! Mission: Registration, login, refresh, logout and session introspection over HTTP

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::{net::SocketAddr, sync::Arc};

use super::jwt::{TokenClass, TokenCodec};
use super::middleware::{authenticate, RequestContext};
use super::models::{LoginRequest, PublicAccount, RefreshResponse, RegisterRequest};
use super::service::AuthService;
use crate::config::SessionTransport;
use crate::error::{ApiError, ApiResult};

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<AuthService>,
    pub transport: SessionTransport,
    pub cookie_domain: String,
}

impl AuthState {
    pub fn new(service: Arc<AuthService>, transport: SessionTransport, cookie_domain: String) -> Self {
        Self {
            service,
            transport,
            cookie_domain,
        }
    }

    fn codec(&self) -> &Arc<TokenCodec> {
        self.service.codec()
    }

    fn session_cookie(&self, token: &str) -> ApiResult<Cookie<'static>> {
        let max_age = self.codec().ttl(TokenClass::Refresh).as_secs();
        let mut cookie = Cookie::parse(format!("{REFRESH_COOKIE}={token}; Max-Age={max_age}"))
            .map_err(|e| ApiError::Internal(format!("failed to build session cookie: {e}")))?;
        cookie.set_path("/");
        cookie.set_domain(self.cookie_domain.clone());
        cookie.set_http_only(true);
        cookie.set_secure(true);
        cookie.set_same_site(SameSite::None);
        Ok(cookie)
    }

    fn expired_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::new(REFRESH_COOKIE, "");
        cookie.set_path("/");
        cookie.set_domain(self.cookie_domain.clone());
        cookie.set_http_only(true);
        cookie.set_secure(true);
        cookie.set_same_site(SameSite::None);
        cookie
    }

    /// Adds the refresh cookie when sessions travel by cookie.
    fn with_session_cookie(&self, jar: CookieJar, token: &str) -> ApiResult<CookieJar> {
        match self.transport {
            SessionTransport::Cookie => Ok(jar.add(self.session_cookie(token)?)),
            SessionTransport::Path => Ok(jar),
        }
    }
}

/// Builds the `/v1/account` and `/v1/auth` routes for the configured transport.
pub fn router(state: AuthState) -> Router {
    let codec = state.codec().clone();

    let protected = Router::new()
        .route("/v1/auth", get(introspect))
        .route_layer(middleware::from_fn_with_state(codec, authenticate));

    let public = Router::new()
        .route("/v1/account", post(register))
        .route("/v1/auth", post(login));

    let sessions = match state.transport {
        SessionTransport::Path => Router::new().route(
            "/v1/auth/:refresh_token",
            get(refresh_from_path).delete(logout_from_path),
        ),
        SessionTransport::Cookie => Router::new()
            .route("/v1/auth/refresh", get(refresh_from_cookie))
            .route("/v1/auth", delete(logout_from_cookie)),
    };

    public
        .merge(sessions)
        .merge(protected)
        .with_state(state)
}

fn peer_ip(connect: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    connect.map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Registration endpoint - POST /v1/account
pub async fn register(
    State(state): State<AuthState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    jar: CookieJar,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    let ip = peer_ip(connect);

    let response = state.service.register(&payload, ip.as_deref()).await?;
    let jar = state.with_session_cookie(jar, &response.refresh_token)?;

    Ok((StatusCode::CREATED, jar, Json(response)).into_response())
}

/// Login endpoint - POST /v1/auth
pub async fn login(
    State(state): State<AuthState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    let ip = peer_ip(connect);

    let response = state.service.login(&payload, ip.as_deref()).await?;
    let jar = state.with_session_cookie(jar, &response.refresh_token)?;

    Ok((jar, Json(response)).into_response())
}

/// Session introspection - GET /v1/auth (bearer)
pub async fn introspect(
    State(state): State<AuthState>,
    ctx: RequestContext,
) -> ApiResult<Json<PublicAccount>> {
    let account = state.service.authenticate_with_token(ctx.account_id).await?;
    Ok(Json(account))
}

/// Refresh - GET /v1/auth/:refresh_token
pub async fn refresh_from_path(
    State(state): State<AuthState>,
    Path(refresh_token): Path<String>,
) -> ApiResult<Json<RefreshResponse>> {
    Ok(Json(state.service.refresh(&refresh_token).await?))
}

/// Logout - DELETE /v1/auth/:refresh_token
pub async fn logout_from_path(
    State(state): State<AuthState>,
    Path(refresh_token): Path<String>,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<StatusCode> {
    let ip = peer_ip(connect);
    state.service.logout(&refresh_token, ip.as_deref()).await?;
    Ok(StatusCode::OK)
}

fn cookie_token(jar: &CookieJar) -> ApiResult<String> {
    jar.get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| ApiError::bad_request("failed to read refresh_token cookie"))
}

/// Refresh - GET /v1/auth/refresh (cookie)
pub async fn refresh_from_cookie(
    State(state): State<AuthState>,
    jar: CookieJar,
) -> ApiResult<Json<RefreshResponse>> {
    let refresh_token = cookie_token(&jar)?;
    Ok(Json(state.service.refresh(&refresh_token).await?))
}

/// Logout - DELETE /v1/auth (cookie)
pub async fn logout_from_cookie(
    State(state): State<AuthState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, StatusCode)> {
    let ip = peer_ip(connect);
    let refresh_token = cookie_token(&jar)?;
    state.service.logout(&refresh_token, ip.as_deref()).await?;

    let jar = jar.remove(state.expired_cookie());
    Ok((jar, StatusCode::OK))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::auth::jwt::tests::test_codec;
    use crate::auth::password::PasswordHasher;
    use crate::auth::session::MemorySessionCache;
    use crate::store::{DocumentStore, Documents, MemoryDocumentStore};
    use axum::{body::Body, http::header};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state(transport: SessionTransport) -> AuthState {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let service = AuthService::new(
            Documents::new(store.clone()),
            Arc::new(MemorySessionCache::new()),
            Arc::new(test_codec()),
            PasswordHasher::new(4),
            AuditLog::new(store),
        );
        AuthState::new(Arc::new(service), transport, "localhost".into())
    }

    fn json_request(method: &str, uri: &str, body: Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn registration() -> Value {
        json!({ "username": "lifter", "email": "lifter@example.com", "password": "correct-horse" })
    }

    #[tokio::test]
    async fn test_cookie_mode_sets_and_clears_cookie() {
        let app = router(state(SessionTransport::Cookie));

        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/account", registration()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.starts_with("refresh_token="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("SameSite=None"));

        let body = body_json(response).await;
        let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

        let refresh = axum::http::Request::builder()
            .uri("/v1/auth/refresh")
            .header(header::COOKIE, format!("refresh_token={refresh_token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(refresh).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await["access_token"].is_string());

        let logout = axum::http::Request::builder()
            .method("DELETE")
            .uri("/v1/auth")
            .header(header::COOKIE, format!("refresh_token={refresh_token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(logout).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cleared = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_cookie_mode_requires_cookie() {
        let app = router(state(SessionTransport::Cookie));
        let request = axum::http::Request::builder()
            .uri("/v1/auth/refresh")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_path_mode_sets_no_cookie() {
        let app = router(state(SessionTransport::Path));
        let response = app
            .oneshot(json_request("POST", "/v1/account", registration()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = router(state(SessionTransport::Path));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/auth")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "failed to unmarshal request body"
        );
    }
}
