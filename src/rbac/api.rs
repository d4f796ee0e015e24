//! Role & Permission API Endpoints
//! Mission: Expose role/grant administration under `/v1/role` and `/v1/permission`

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::RoleAdmin;
use super::models::{CreateRoleRequest, Permission, Role};
use super::permissions::{PermissionResolver, PermissionSet};
use crate::auth::jwt::TokenCodec;
use crate::auth::middleware::{authenticate, RequestContext};
use crate::error::{ApiError, ApiResult};

fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("invalid {what} id")))
}

fn parse_permission(raw: &str) -> ApiResult<Permission> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("unknown permission: {raw}")))
}

/// Resolves the caller's permissions once and stores them on the request context.
/// Must run after [`authenticate`].
pub async fn attach_permissions(
    State(resolver): State<Arc<PermissionResolver>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let mut ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("not authenticated"))?;

    let permissions = resolver
        .resolve(ctx.account_id)
        .await
        .map_err(|e| ApiError::from_store("account", e))?;
    ctx.permissions = Some(Arc::new(permissions));
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

/// Builds the `/v1/role` and `/v1/permission` routers behind authentication
/// and permission attachment.
pub fn router(admin: Arc<RoleAdmin>, resolver: Arc<PermissionResolver>, codec: Arc<TokenCodec>) -> Router {
    let roles = Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/account/:account_id", get(roles_for_account))
        .route(
            "/grant/account/:account_id/:role_id",
            put(grant_role).delete(revoke_role),
        )
        .route("/grant/role/:role_id/:permission", put(grant_role_permission))
        .route("/revoke/role/:role_id/:permission", put(revoke_role_permission))
        .route("/:role_id", delete(delete_role));

    let permissions = Router::new()
        .route("/account/:account_id", get(permissions_for_account))
        .route("/role/:role_id", get(permissions_for_role))
        .route(
            "/grant/account/:account_id/:permission",
            put(grant_account_permission),
        )
        .route(
            "/revoke/account/:account_id/:permission",
            put(revoke_account_permission),
        );

    Router::new()
        .nest("/v1/role", roles)
        .nest("/v1/permission", permissions)
        .route_layer(middleware::from_fn_with_state(resolver, attach_permissions))
        .route_layer(middleware::from_fn_with_state(codec, authenticate))
        .with_state(admin)
}

/// GET /v1/role
pub async fn list_roles(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(admin.list_roles(&ctx).await?))
}

/// GET /v1/role/account/:account_id
pub async fn roles_for_account(
    State(admin): State<Arc<RoleAdmin>>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Vec<Role>>> {
    let account_id = parse_id(&account_id, "account")?;
    Ok(Json(admin.roles_for_account(account_id).await?))
}

/// POST /v1/role
pub async fn create_role(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(req) = payload?;
    let id = admin.create_role(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": id }))))
}

/// DELETE /v1/role/:role_id
pub async fn delete_role(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    Path(role_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let role_id = parse_id(&role_id, "role")?;
    let updated = admin.delete_role(&ctx, role_id).await?;
    Ok(Json(json!({ "message": updated })))
}

/// PUT /v1/role/grant/account/:account_id/:role_id
pub async fn grant_role(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    Path((account_id, role_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let account_id = parse_id(&account_id, "account")?;
    let role_id = parse_id(&role_id, "role")?;
    admin.grant_role(&ctx, account_id, role_id).await?;
    Ok(StatusCode::OK)
}

/// DELETE /v1/role/grant/account/:account_id/:role_id
pub async fn revoke_role(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    Path((account_id, role_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let account_id = parse_id(&account_id, "account")?;
    let role_id = parse_id(&role_id, "role")?;
    admin.revoke_role(&ctx, account_id, role_id).await?;
    Ok(StatusCode::OK)
}

/// PUT /v1/role/grant/role/:role_id/:permission
pub async fn grant_role_permission(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    Path((role_id, permission)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let role_id = parse_id(&role_id, "role")?;
    let permission = parse_permission(&permission)?;
    admin.grant_role_permission(&ctx, role_id, permission).await?;
    Ok(StatusCode::OK)
}

/// PUT /v1/role/revoke/role/:role_id/:permission
pub async fn revoke_role_permission(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    Path((role_id, permission)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let role_id = parse_id(&role_id, "role")?;
    let permission = parse_permission(&permission)?;
    admin.revoke_role_permission(&ctx, role_id, permission).await?;
    Ok(StatusCode::OK)
}

/// GET /v1/permission/account/:account_id
pub async fn permissions_for_account(
    State(admin): State<Arc<RoleAdmin>>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<PermissionSet>> {
    let account_id = parse_id(&account_id, "account")?;
    Ok(Json(admin.permissions_for_account(account_id).await?))
}

/// GET /v1/permission/role/:role_id
pub async fn permissions_for_role(
    State(admin): State<Arc<RoleAdmin>>,
    Path(role_id): Path<String>,
) -> ApiResult<Json<Vec<Permission>>> {
    let role_id = parse_id(&role_id, "role")?;
    Ok(Json(admin.permissions_for_role(role_id).await?))
}

/// PUT /v1/permission/grant/account/:account_id/:permission
pub async fn grant_account_permission(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    Path((account_id, permission)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let account_id = parse_id(&account_id, "account")?;
    let permission = parse_permission(&permission)?;
    admin.grant_account_permission(&ctx, account_id, permission).await?;
    Ok(StatusCode::OK)
}

/// PUT /v1/permission/revoke/account/:account_id/:permission
pub async fn revoke_account_permission(
    State(admin): State<Arc<RoleAdmin>>,
    ctx: RequestContext,
    Path((account_id, permission)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let account_id = parse_id(&account_id, "account")?;
    let permission = parse_permission(&permission)?;
    admin.revoke_account_permission(&ctx, account_id, permission).await?;
    Ok(StatusCode::OK)
}
