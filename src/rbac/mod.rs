//! Role-Based Access Control
//! Mission: Aggregate permissions and administer roles and grants

pub mod admin;
pub mod api;
pub mod models;
pub mod permissions;

pub use admin::RoleAdmin;
pub use models::{CreateRoleRequest, Permission, Role};
pub use permissions::{PermissionResolver, PermissionSet};
