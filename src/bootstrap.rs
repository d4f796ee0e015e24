//! Admin Bootstrap
//! Mission: Seed (or remove) the development `admin` account at startup

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::auth::{Account, PasswordHasher};
use crate::config::{BootstrapConfig, ServerMode};
use crate::rbac::Permission;
use crate::store::Documents;

pub const ADMIN_USERNAME: &str = "admin";

/// Creates an `admin` account holding every permission when the switch is on,
/// and deletes it when the switch is off. Refuses to seed in release mode.
pub async fn ensure_admin_account(
    bootstrap: &BootstrapConfig,
    mode: ServerMode,
    accounts: &Documents<Account>,
    hasher: &PasswordHasher,
) -> Result<()> {
    let existing = accounts
        .find_optional_by_field("username", ADMIN_USERNAME)
        .await
        .context("Failed to look up admin account")?;

    if !bootstrap.create_admin_account {
        if let Some(admin) = existing {
            accounts
                .delete(admin.id)
                .await
                .context("Failed to remove admin account")?;
            warn!("🧹 Removed bootstrap admin account {}", admin.id);
        }
        return Ok(());
    }

    if mode == ServerMode::Release {
        bail!("bootstrap.create_admin_account must not be enabled in release mode");
    }

    if existing.is_some() {
        info!("👤 Admin account already present");
        return Ok(());
    }

    let hash = hasher
        .hash_async(&bootstrap.admin_password)
        .await
        .context("Failed to hash admin password")?;
    let mut admin = Account::new_standard(ADMIN_USERNAME, bootstrap.admin_email.clone(), hash);
    admin.permissions = Permission::ALL.to_vec();

    let id = accounts
        .insert(&admin)
        .await
        .context("Failed to insert admin account")?;
    warn!("👤 Created bootstrap admin account {} ({})", id, bootstrap.admin_email);

    Ok(())
}
