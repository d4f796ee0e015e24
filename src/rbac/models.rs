//! Role & Permission Models
//! Mission: Capability tags and the role documents that bundle them

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::store::{Collection, Document};

/// Capability tag checked by privileged operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ModerateUsers,
    ModeratePosts,
    AuthorBlogs,
    AuthorExercises,
    AuthorFood,
    AuthorLocation,
    ViewAudit,
    ViewRoles,
    BypassPrivacy,
    GrantPermissions,
    GrantRoles,
}

impl Permission {
    pub const ALL: [Permission; 11] = [
        Permission::ModerateUsers,
        Permission::ModeratePosts,
        Permission::AuthorBlogs,
        Permission::AuthorExercises,
        Permission::AuthorFood,
        Permission::AuthorLocation,
        Permission::ViewAudit,
        Permission::ViewRoles,
        Permission::BypassPrivacy,
        Permission::GrantPermissions,
        Permission::GrantRoles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ModerateUsers => "moderate_users",
            Permission::ModeratePosts => "moderate_posts",
            Permission::AuthorBlogs => "author_blogs",
            Permission::AuthorExercises => "author_exercises",
            Permission::AuthorFood => "author_food",
            Permission::AuthorLocation => "author_location",
            Permission::ViewAudit => "view_audit",
            Permission::ViewRoles => "view_roles",
            Permission::BypassPrivacy => "bypass_privacy",
            Permission::GrantPermissions => "grant_permissions",
            Permission::GrantRoles => "grant_roles",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPermission(pub String);

impl fmt::Display for UnknownPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown permission: {}", self.0)
    }
}

impl std::error::Error for UnknownPermission {}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// Administrator-managed bundle of permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, permissions: Vec<Permission>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            display_name: display_name.into(),
            permissions,
        }
    }
}

impl Document for Role {
    const COLLECTION: Collection = Collection::Roles;

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Role creation request body
#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}
