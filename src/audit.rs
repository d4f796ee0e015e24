//! Audit Trail
//! Mission: Record security-relevant events without ever failing the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::warn;
use uuid::Uuid;

use crate::store::{Collection, Document, DocumentStore, Documents};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    CreateAccount,
    AuthWithCredentials,
    Logout,
    CreateRole,
    DeleteRole,
    GrantRole,
    RevokeRole,
    GrantRolePermission,
    RevokeRolePermission,
    GrantAccountPermission,
    RevokeAccountPermission,
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditEvent::CreateAccount => "create_account",
            AuditEvent::AuthWithCredentials => "auth_with_credentials",
            AuditEvent::Logout => "logout",
            AuditEvent::CreateRole => "create_role",
            AuditEvent::DeleteRole => "delete_role",
            AuditEvent::GrantRole => "grant_role",
            AuditEvent::RevokeRole => "revoke_role",
            AuditEvent::GrantRolePermission => "grant_role_permission",
            AuditEvent::RevokeRolePermission => "revoke_role_permission",
            AuditEvent::GrantAccountPermission => "grant_account_permission",
            AuditEvent::RevokeAccountPermission => "revoke_account_permission",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub initiator: Uuid,
    pub event: AuditEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_parties: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(initiator: Uuid, event: AuditEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            initiator,
            event,
            ip: None,
            other_parties: Vec::new(),
            context: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn ip(mut self, ip: Option<&str>) -> Self {
        self.ip = ip.map(str::to_string);
        self
    }

    pub fn other_party(mut self, id: Uuid) -> Self {
        self.other_parties.push(id);
        self
    }

    pub fn context(mut self, line: impl Into<String>) -> Self {
        self.context.push(line.into());
        self
    }
}

impl Document for AuditEntry {
    const COLLECTION: Collection = Collection::Audit;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Clone)]
pub struct AuditLog {
    entries: Documents<AuditEntry>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            entries: Documents::new(store),
        }
    }

    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.entries.insert(&entry).await {
            warn!(
                event = %entry.event,
                initiator = %entry.initiator,
                "Failed to save audit entry: {}",
                e
            );
        }
    }
}
