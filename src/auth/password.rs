//! Credential Verifier
//! Mission: bcrypt hashing and verification of account passwords
//!
//! bcrypt is CPU bound, so request paths use the `*_async` variants
//! which run on the blocking pool instead of an async worker.

use bcrypt::{hash, verify, BcryptError};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::warn;

const DECOY_PASSWORD: &str = "ares-decoy-password";

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("bcrypt failed: {0}")]
    Hash(#[from] BcryptError),

    #[error("password worker failed: {0}")]
    Worker(#[from] JoinError),
}

#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// Hash at the same cost, checked when no account matches a login.
    decoy_hash: Option<String>,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        let decoy_hash = match hash(DECOY_PASSWORD, cost) {
            Ok(h) => Some(h),
            Err(e) => {
                warn!("Could not prepare decoy password hash: {}", e);
                None
            }
        };
        Self { cost, decoy_hash }
    }

    pub fn hash(&self, password: &str) -> Result<String, BcryptError> {
        hash(password, self.cost)
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify(&self, password: &str, password_hash: &str) -> bool {
        match verify(password, password_hash) {
            Ok(valid) => valid,
            Err(e) => {
                warn!("Stored password hash could not be checked: {}", e);
                false
            }
        }
    }

    pub async fn hash_async(&self, password: &str) -> Result<String, PasswordError> {
        let hasher = self.clone();
        let password = password.to_string();
        let hashed = tokio::task::spawn_blocking(move || hasher.hash(&password)).await??;
        Ok(hashed)
    }

    pub async fn verify_async(&self, password: &str, password_hash: &str) -> bool {
        let hasher = self.clone();
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        match tokio::task::spawn_blocking(move || hasher.verify(&password, &password_hash)).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!("Password worker failed: {}", e);
                false
            }
        }
    }

    /// Spends one verification on the decoy hash. Always a mismatch.
    pub async fn verify_decoy(&self, password: &str) {
        if let Some(decoy) = &self.decoy_hash {
            self.verify_async(password, decoy).await;
        }
    }
}
