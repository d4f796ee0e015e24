//! Authentication Models
//! Mission: Define account, token and auth request/response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::rbac::Permission;
use crate::store::{Collection, Document};

/// How the account authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Standard,
    Apple,
    Google,
}

/// Account document (the authenticated subject)
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String, // bcrypt hash - never leaves the service
    #[serde(default)]
    pub account_type: AccountType,
    pub created_at: DateTime<Utc>,
    /// Direct grants.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Role references; may hold duplicates or ids of deleted roles.
    #[serde(default)]
    pub roles: Vec<Uuid>,
}

impl Account {
    pub fn new_standard(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password_hash,
            account_type: AccountType::Standard,
            created_at: Utc::now(),
            permissions: Vec::new(),
            roles: Vec::new(),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("account_type", &self.account_type)
            .field("permissions", &self.permissions)
            .field("roles", &self.roles)
            .finish()
    }
}

impl Document for Account {
    const COLLECTION: Collection = Collection::Accounts;

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Account projection returned to clients (sanitized)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicAccount {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
}

impl From<&Account> for PublicAccount {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            account_type: account.account_type,
        }
    }
}

/// JWT claims payload shared by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>, // account id
    pub iat: i64,
    pub exp: i64,
    pub jti: String, // makes every issued token string unique
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Login / registration response
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub account: PublicAccount,
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_type_serialization() {
        let json = serde_json::to_string(&AccountType::Google).unwrap();
        assert_eq!(json, r#""google""#);

        let standard: AccountType = serde_json::from_str(r#""standard""#).unwrap();
        assert_eq!(standard, AccountType::Standard);
    }

    #[test]
    fn test_public_projection_hides_hash() {
        let account = Account::new_standard("squatter", "squat@example.com", "$2b$04$secret".into());
        let public = PublicAccount::from(&account);
        let json = serde_json::to_value(&public).unwrap();

        assert_eq!(json["id"], serde_json::json!(account.id));
        assert_eq!(json["type"], "standard");
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_debug_redacts_hash() {
        let account = Account::new_standard("squatter", "squat@example.com", "$2b$04$secret".into());
        let debug = format!("{:?}", account);
        assert!(!debug.contains("$2b$04$secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_legacy_document_defaults() {
        let id = Uuid::new_v4();
        let doc = serde_json::json!({
            "id": id,
            "username": "old",
            "email": "old@example.com",
            "password_hash": "x",
            "created_at": "2024-01-01T00:00:00Z"
        });
        let account: Account = serde_json::from_value(doc).unwrap();
        assert!(account.roles.is_empty());
        assert!(account.permissions.is_empty());
        assert_eq!(account.account_type, AccountType::Standard);
    }
}
