//! Role/Grant Administration
//! Mission: Create and delete roles, manage role and permission grants on accounts
//!
//! Every mutation checks the caller's aggregated permissions first and has no
//! side effects when that check fails.
//!
//! None of these operations are transactional. Role creation checks the name
//! and then inserts, so two concurrent creates with the same name can both
//! succeed. Role deletion removes the role document first and then sweeps
//! holders one by one; an interrupted sweep leaves dangling references that
//! permission resolution skips, and re-running the delete path on a clean
//! account is a no-op.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{CreateRoleRequest, Permission, Role};
use super::permissions::{PermissionResolver, PermissionSet};
use crate::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::auth::middleware::RequestContext;
use crate::auth::models::Account;
use crate::error::{ApiError, ApiResult};
use crate::store::{Documents, Filter, FindOptions};

const ROLE_NAME_MAX_LEN: usize = 64;

fn validate_role_label(value: &str, field: &str) -> ApiResult<()> {
    let valid = !value.trim().is_empty()
        && value.len() <= ROLE_NAME_MAX_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ');
    if !valid {
        return Err(ApiError::bad_request(format!("{field} must be alphanumeric")));
    }
    Ok(())
}

pub struct RoleAdmin {
    accounts: Documents<Account>,
    roles: Documents<Role>,
    resolver: Arc<PermissionResolver>,
    audit: AuditLog,
}

impl RoleAdmin {
    pub fn new(
        accounts: Documents<Account>,
        roles: Documents<Role>,
        resolver: Arc<PermissionResolver>,
        audit: AuditLog,
    ) -> Self {
        Self {
            accounts,
            roles,
            resolver,
            audit,
        }
    }

    /// Caller's permissions, from the request context when already attached.
    async fn caller_permissions(&self, ctx: &RequestContext) -> ApiResult<Arc<PermissionSet>> {
        if let Some(permissions) = &ctx.permissions {
            return Ok(permissions.clone());
        }
        let resolved = self
            .resolver
            .resolve(ctx.account_id)
            .await
            .map_err(|e| ApiError::from_store("account", e))?;
        Ok(Arc::new(resolved))
    }

    async fn authorize(&self, ctx: &RequestContext, needed: Permission) -> ApiResult<()> {
        let permissions = self.caller_permissions(ctx).await?;
        if !permissions.contains(needed) {
            warn!(
                account_id = %ctx.account_id,
                permission = %needed,
                "🚫 Insufficient permissions"
            );
            return Err(ApiError::Forbidden);
        }
        Ok(())
    }

    async fn load_account(&self, id: Uuid) -> ApiResult<Account> {
        self.accounts
            .find_by_id(id)
            .await
            .map_err(|e| ApiError::from_store("account", e))
    }

    async fn load_role(&self, id: Uuid) -> ApiResult<Role> {
        self.roles
            .find_by_id(id)
            .await
            .map_err(|e| ApiError::from_store("role", e))
    }

    async fn save_account(&self, account: &Account) -> ApiResult<()> {
        let modified = self
            .accounts
            .update(account)
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to update account: {e}")))?;
        if modified == 0 {
            return Err(ApiError::not_found("account not found"));
        }
        Ok(())
    }

    async fn save_role(&self, role: &Role) -> ApiResult<()> {
        let modified = self
            .roles
            .update(role)
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to update role: {e}")))?;
        if modified == 0 {
            return Err(ApiError::not_found("role not found"));
        }
        Ok(())
    }

    async fn record(&self, ctx: &RequestContext, entry: AuditEntry) {
        self.audit.record(entry.ip(ctx.client_ip.as_deref())).await;
    }

    pub async fn list_roles(&self, ctx: &RequestContext) -> ApiResult<Vec<Role>> {
        self.authorize(ctx, Permission::ViewRoles).await?;
        self.roles
            .find_many(&Filter::All, FindOptions::default())
            .await
            .map_err(|e| ApiError::from_store("role", e))
    }

    /// Roles currently held by an account; unresolvable references are left out.
    pub async fn roles_for_account(&self, account_id: Uuid) -> ApiResult<Vec<Role>> {
        let account = self.load_account(account_id).await?;
        Ok(self.resolver.resolve_roles(&account).await)
    }

    pub async fn create_role(&self, ctx: &RequestContext, req: CreateRoleRequest) -> ApiResult<Uuid> {
        self.authorize(ctx, Permission::GrantRoles).await?;
        validate_role_label(&req.name, "name")?;
        validate_role_label(&req.display_name, "display name")?;

        let existing = self
            .roles
            .find_optional_by_field("name", req.name.as_str())
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to query existing role: {e}")))?;
        if existing.is_some() {
            return Err(ApiError::conflict("role name already exists"));
        }

        let permissions: PermissionSet = req.permissions.into_iter().collect();
        let role = Role::new(req.name, req.display_name, permissions.iter().collect());
        let id = self
            .roles
            .insert(&role)
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to insert role: {e}")))?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::CreateRole)
                .other_party(id)
                .context(format!("role name: {}", role.name)),
        )
        .await;
        info!("🛡️  Role created: {} ({})", role.name, id);

        Ok(id)
    }

    /// Deletes the role, then strips it from every holder. Returns the number of
    /// accounts updated by the sweep.
    pub async fn delete_role(&self, ctx: &RequestContext, role_id: Uuid) -> ApiResult<u64> {
        self.authorize(ctx, Permission::GrantRoles).await?;

        let role = self.load_role(role_id).await?;
        let deleted = self
            .roles
            .delete(role_id)
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to delete role: {e}")))?;
        if deleted == 0 {
            return Err(ApiError::not_found("role not found"));
        }

        let updated = self.sweep_role_references(role_id).await?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::DeleteRole)
                .other_party(role_id)
                .context(format!("role name: {}", role.name))
                .context(format!("accounts updated: {updated}")),
        )
        .await;
        info!("🗑️  Role deleted: {} ({}), {} accounts updated", role.name, role_id, updated);

        Ok(updated)
    }

    /// Removes every reference to `role_id` from accounts holding it.
    /// A failed update is logged and skipped; the rest of the sweep continues.
    async fn sweep_role_references(&self, role_id: Uuid) -> ApiResult<u64> {
        let holders = self
            .accounts
            .find_many(&Filter::contains("roles", role_id.to_string()), FindOptions::default())
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to find role holders: {e}")))?;

        let mut updated = 0;
        for mut account in holders {
            account.roles.retain(|id| *id != role_id);
            match self.accounts.update(&account).await {
                Ok(n) if n > 0 => updated += 1,
                Ok(_) => warn!(account_id = %account.id, %role_id, "Role holder vanished during sweep"),
                Err(e) => warn!(
                    account_id = %account.id,
                    %role_id,
                    "Failed to strip deleted role from account: {}",
                    e
                ),
            }
        }

        Ok(updated)
    }

    pub async fn grant_role(&self, ctx: &RequestContext, account_id: Uuid, role_id: Uuid) -> ApiResult<()> {
        self.authorize(ctx, Permission::GrantRoles).await?;

        let mut account = self.load_account(account_id).await?;
        let role = self.load_role(role_id).await?;

        if account.roles.contains(&role_id) {
            return Err(ApiError::conflict("account already has role"));
        }

        account.roles.push(role_id);
        self.save_account(&account).await?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::GrantRole)
                .other_party(account_id)
                .other_party(role_id)
                .context(format!("role name: {}", role.name)),
        )
        .await;
        info!("Role {} granted to account {}", role.name, account_id);

        Ok(())
    }

    /// The role document itself need not exist, so references to deleted
    /// roles can still be cleaned up here.
    pub async fn revoke_role(&self, ctx: &RequestContext, account_id: Uuid, role_id: Uuid) -> ApiResult<()> {
        self.authorize(ctx, Permission::GrantRoles).await?;

        let mut account = self.load_account(account_id).await?;
        if !account.roles.contains(&role_id) {
            return Err(ApiError::not_found("account does not have role"));
        }

        account.roles.retain(|id| *id != role_id);
        self.save_account(&account).await?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::RevokeRole)
                .other_party(account_id)
                .other_party(role_id),
        )
        .await;
        info!("Role {} revoked from account {}", role_id, account_id);

        Ok(())
    }

    pub async fn grant_role_permission(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
        permission: Permission,
    ) -> ApiResult<()> {
        self.authorize(ctx, Permission::GrantPermissions).await?;

        let mut role = self.load_role(role_id).await?;
        if role.permissions.contains(&permission) {
            return Err(ApiError::conflict("role already has permission"));
        }
        role.permissions.push(permission);
        self.save_role(&role).await?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::GrantRolePermission)
                .other_party(role_id)
                .context(format!("permission: {permission}")),
        )
        .await;
        Ok(())
    }

    pub async fn revoke_role_permission(
        &self,
        ctx: &RequestContext,
        role_id: Uuid,
        permission: Permission,
    ) -> ApiResult<()> {
        self.authorize(ctx, Permission::GrantPermissions).await?;

        let mut role = self.load_role(role_id).await?;
        if !role.permissions.contains(&permission) {
            return Err(ApiError::not_found("role does not have permission"));
        }
        role.permissions.retain(|p| *p != permission);
        self.save_role(&role).await?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::RevokeRolePermission)
                .other_party(role_id)
                .context(format!("permission: {permission}")),
        )
        .await;
        Ok(())
    }

    pub async fn grant_account_permission(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
        permission: Permission,
    ) -> ApiResult<()> {
        self.authorize(ctx, Permission::GrantPermissions).await?;

        let mut account = self.load_account(account_id).await?;
        if account.permissions.contains(&permission) {
            return Err(ApiError::conflict("account already has permission"));
        }
        account.permissions.push(permission);
        self.save_account(&account).await?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::GrantAccountPermission)
                .other_party(account_id)
                .context(format!("permission: {permission}")),
        )
        .await;
        Ok(())
    }

    pub async fn revoke_account_permission(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
        permission: Permission,
    ) -> ApiResult<()> {
        self.authorize(ctx, Permission::GrantPermissions).await?;

        let mut account = self.load_account(account_id).await?;
        if !account.permissions.contains(&permission) {
            return Err(ApiError::not_found("account does not have permission"));
        }
        account.permissions.retain(|p| *p != permission);
        self.save_account(&account).await?;

        self.record(
            ctx,
            AuditEntry::new(ctx.account_id, AuditEvent::RevokeAccountPermission)
                .other_party(account_id)
                .context(format!("permission: {permission}")),
        )
        .await;
        Ok(())
    }

    /// Aggregated permissions of any account.
    pub async fn permissions_for_account(&self, account_id: Uuid) -> ApiResult<PermissionSet> {
        self.resolver
            .resolve(account_id)
            .await
            .map_err(|e| ApiError::from_store("account", e))
    }

    pub async fn permissions_for_role(&self, role_id: Uuid) -> ApiResult<Vec<Permission>> {
        Ok(self.load_role(role_id).await?.permissions)
    }
}
