//! Permission Aggregation
//! Mission: Union of an account's direct grants and everything its roles carry
//!
//! Role references that fail to resolve are skipped, never fatal. A deleted
//! role therefore drops out of every holder's effective permissions even while
//! the cascading cleanup in `RoleAdmin::delete_role` is still running.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{Permission, Role};
use crate::auth::models::Account;
use crate::store::{Documents, StoreResult};

/// Value-deduplicated permission set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `permission` unless an equal one is present. Returns whether it was added.
    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn is_superset(&self, other: &PermissionSet) -> bool {
        self.0.is_superset(&other.0)
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<I: IntoIterator<Item = Permission>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

pub struct PermissionResolver {
    accounts: Documents<Account>,
    roles: Documents<Role>,
}

impl PermissionResolver {
    pub fn new(accounts: Documents<Account>, roles: Documents<Role>) -> Self {
        Self { accounts, roles }
    }

    /// Loads the account and aggregates its permissions.
    ///
    /// Fails only when the account itself cannot be loaded.
    pub async fn resolve(&self, account_id: Uuid) -> StoreResult<PermissionSet> {
        let account = self.accounts.find_by_id(account_id).await?;
        Ok(self.resolve_account(&account).await)
    }

    /// Aggregates permissions for an already loaded account.
    pub async fn resolve_account(&self, account: &Account) -> PermissionSet {
        let mut permissions: PermissionSet = account.permissions.iter().copied().collect();

        for role in self.resolve_roles(account).await {
            permissions.extend(role.permissions);
        }

        debug!(
            account_id = %account.id,
            count = permissions.len(),
            "resolved permissions"
        );
        permissions
    }

    /// Fetches each distinct role referenced by the account, skipping ones
    /// that no longer resolve.
    pub async fn resolve_roles(&self, account: &Account) -> Vec<Role> {
        let mut seen = HashSet::new();
        let mut roles = Vec::new();

        for role_id in &account.roles {
            if !seen.insert(*role_id) {
                continue;
            }

            match self.roles.find_by_id(*role_id).await {
                Ok(role) => roles.push(role),
                Err(e) if e.is_not_found() => {
                    debug!(account_id = %account.id, %role_id, "skipping dangling role reference");
                }
                Err(e) => {
                    warn!(
                        account_id = %account.id,
                        %role_id,
                        "skipping role that failed to load: {}",
                        e
                    );
                }
            }
        }

        roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryDocumentStore};
    use std::sync::Arc;

    struct Fixture {
        accounts: Documents<Account>,
        roles: Documents<Role>,
        resolver: PermissionResolver,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let accounts = Documents::new(store.clone());
        let roles = Documents::new(store);
        let resolver = PermissionResolver::new(accounts.clone(), roles.clone());
        Fixture {
            accounts,
            roles,
            resolver,
        }
    }

    fn account() -> Account {
        Account::new_standard("member", "member@example.com", "hash".into())
    }

    #[test]
    fn test_set_deduplicates_by_value() {
        let mut set = PermissionSet::new();
        assert!(set.insert(Permission::ViewAudit));
        assert!(!set.insert(Permission::ViewAudit));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_direct_and_role_permissions_are_unioned() {
        let f = fixture();
        let moderator = Role::new(
            "moderator",
            "Moderator",
            vec![Permission::ModeratePosts, Permission::ViewAudit],
        );
        f.roles.insert(&moderator).await.unwrap();

        let mut member = account();
        member.permissions = vec![Permission::ViewAudit, Permission::AuthorBlogs];
        member.roles = vec![moderator.id];
        f.accounts.insert(&member).await.unwrap();

        let resolved = f.resolver.resolve(member.id).await.unwrap();
        let expected: PermissionSet = [
            Permission::ViewAudit,
            Permission::AuthorBlogs,
            Permission::ModeratePosts,
        ]
        .into_iter()
        .collect();
        assert_eq!(resolved, expected);
    }

    #[tokio::test]
    async fn test_dangling_and_duplicate_roles_are_tolerated() {
        let f = fixture();
        let coach = Role::new("coach", "Coach", vec![Permission::AuthorExercises]);
        f.roles.insert(&coach).await.unwrap();

        let mut member = account();
        member.roles = vec![coach.id, Uuid::new_v4(), coach.id];
        f.accounts.insert(&member).await.unwrap();

        let resolved = f.resolver.resolve(member.id).await.unwrap();
        assert_eq!(resolved.iter().collect::<Vec<_>>(), vec![Permission::AuthorExercises]);
        assert_eq!(f.resolver.resolve_roles(&member).await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let f = fixture();
        let role = Role::new("editor", "Editor", vec![Permission::AuthorBlogs, Permission::AuthorFood]);
        f.roles.insert(&role).await.unwrap();

        let mut member = account();
        member.roles = vec![role.id];
        f.accounts.insert(&member).await.unwrap();

        let first = f.resolver.resolve(member.id).await.unwrap();
        let second = f.resolver.resolve(member.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_account_fails() {
        let f = fixture();
        let err = f.resolver.resolve(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
