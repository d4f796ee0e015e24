//! Request Authenticator
//! Mission: Verify bearer access tokens and bind the caller into a typed request context

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;
use uuid::Uuid;

use super::jwt::{unquote, TokenClass, TokenCodec};
use crate::error::ApiError;
use crate::rbac::PermissionSet;

const BEARER_PREFIX: &str = "Bearer ";

/// Per-request identity established by [`authenticate`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub account_id: Uuid,
    pub client_ip: Option<String>,
    /// Filled by the permission-attaching layer on routes that use it.
    pub permissions: Option<Arc<PermissionSet>>,
}

impl RequestContext {
    pub fn new(account_id: Uuid) -> Self {
        Self {
            account_id,
            client_ip: None,
            permissions: None,
        }
    }
}

/// Caller address as seen by the listener, when the server exposes it.
pub fn client_ip(extensions: &axum::http::Extensions) -> Option<String> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Pulls the raw token out of an `Authorization: Bearer ...` header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("bad authorization header"))?;

    if header.len() < BEARER_PREFIX.len()
        || !header[..BEARER_PREFIX.len()].eq_ignore_ascii_case(BEARER_PREFIX)
    {
        return Err(ApiError::unauthorized("bad authorization header"));
    }

    let token = header[BEARER_PREFIX.len()..].trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized("bad authorization header"));
    }

    unquote(token).ok_or_else(|| ApiError::bad_request("failed to unquote token"))
}

/// Authentication middleware. Aborts the chain with 401 on any failure and
/// never touches the session cache.
pub async fn authenticate(
    State(codec): State<Arc<TokenCodec>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?;

    let subject = codec
        .verify_subject(TokenClass::Access, token)
        .map_err(|e| {
            debug!("Access token rejected: {}", e);
            ApiError::unauthorized(format!("token invalid: {e}"))
        })?;

    let account_id = Uuid::parse_str(&subject)
        .map_err(|_| ApiError::unauthorized("token subject is not an account id"))?;

    let context = RequestContext {
        account_id,
        client_ip: client_ip(req.extensions()),
        permissions: None,
    };
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("not authenticated"))
    }
}
