//! Configuration
//! Mission: Build one immutable config snapshot at startup from TOML plus environment overrides
//!
//! Nothing reads configuration at request time; components receive the parts
//! they need through their constructors.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

use crate::auth::session::DEFAULT_CACHE_TIMEOUT;
use crate::store::timed::DEFAULT_STORE_TIMEOUT;

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const MIN_HMAC_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Debug,
    Release,
}

impl std::str::FromStr for ServerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(ServerMode::Debug),
            "release" => Ok(ServerMode::Release),
            other => bail!("unknown server mode {other:?} (expected debug or release)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub mode: ServerMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            mode: ServerMode::Debug,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Where clients present the refresh token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTransport {
    /// `/v1/auth/{refresh_token}` path segment
    #[default]
    Path,
    /// `refresh_token` cookie
    Cookie,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session_transport: SessionTransport,
    pub cookie_domain: String,
    pub bcrypt_cost: u32,
    pub access_token: TokenKeyConfig,
    pub refresh_token: TokenKeyConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_transport: SessionTransport::Path,
            cookie_domain: "localhost".to_string(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            access_token: TokenKeyConfig::with_ttl(15 * 60),
            refresh_token: TokenKeyConfig::with_ttl(7 * 24 * 60 * 60),
        }
    }
}

/// Key material and TTL for one token class
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TokenKeyConfig {
    /// JWS algorithm name, e.g. `HS256`, `RS256`, `EdDSA`.
    pub algorithm: String,
    /// Shared secret for HMAC algorithms.
    pub secret: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
    pub ttl_secs: u64,
    pub leeway_secs: u64,
}

impl TokenKeyConfig {
    fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            ..Self::default()
        }
    }

    fn is_hmac(&self) -> bool {
        self.algorithm.to_ascii_uppercase().starts_with("HS")
    }
}

impl Default for TokenKeyConfig {
    fn default() -> Self {
        Self {
            algorithm: "HS256".to_string(),
            secret: None,
            private_key_path: None,
            public_key_path: None,
            ttl_secs: 15 * 60,
            leeway_secs: 5,
        }
    }
}

impl std::fmt::Debug for TokenKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeyConfig")
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("ttl_secs", &self.ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub timeout_ms: u64,
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CACHE_TIMEOUT.as_millis() as u64,
            purge_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: String,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "ares.db".to_string(),
            timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub create_admin_account: bool,
    pub admin_email: String,
    pub admin_password: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            create_admin_account: false,
            admin_email: "admin@localhost".to_string(),
            admin_password: "admin".to_string(),
        }
    }
}

impl std::fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("create_admin_account", &self.create_admin_account)
            .field("admin_email", &self.admin_email)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Loads `path`, else `config.toml` in the working directory, else defaults;
    /// then applies `ARES_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                warn!("⚠️  No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                Self::default()
            }
        };

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("📄 Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies overrides from `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("ARES_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("ARES_PORT is not a valid port: {port}"))?;
        }
        if let Some(mode) = lookup("ARES_MODE") {
            self.server.mode = mode.parse()?;
        }
        if let Some(path) = lookup("ARES_STORE_PATH") {
            self.store.path = path;
        }
        if let Some(secret) = lookup("ARES_ACCESS_TOKEN_SECRET") {
            self.auth.access_token.secret = Some(secret);
        }
        if let Some(secret) = lookup("ARES_REFRESH_TOKEN_SECRET") {
            self.auth.refresh_token.secret = Some(secret);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, keys) in [
            ("access_token", &self.auth.access_token),
            ("refresh_token", &self.auth.refresh_token),
        ] {
            if keys.ttl_secs == 0 {
                bail!("auth.{name}.ttl_secs must be greater than zero");
            }

            if keys.is_hmac() {
                match keys.secret.as_deref() {
                    None | Some("") => bail!("auth.{name} uses {} but has no secret", keys.algorithm),
                    Some(secret) if secret.len() < MIN_HMAC_SECRET_LEN => warn!(
                        "auth.{} secret is shorter than {} bytes",
                        name, MIN_HMAC_SECRET_LEN
                    ),
                    Some(_) => {}
                }
            } else if keys.private_key_path.is_none() || keys.public_key_path.is_none() {
                bail!(
                    "auth.{name} uses {} but private_key_path/public_key_path are not both set",
                    keys.algorithm
                );
            }
        }

        if self.auth.refresh_token.ttl_secs < self.auth.access_token.ttl_secs {
            bail!("auth.refresh_token.ttl_secs must not be shorter than auth.access_token.ttl_secs");
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            bail!("auth.bcrypt_cost must be between 4 and 31");
        }

        if self.cache.timeout_ms == 0 || self.store.timeout_ms == 0 {
            bail!("cache.timeout_ms and store.timeout_ms must be greater than zero");
        }

        if self.cache.purge_interval_secs == 0 {
            bail!("cache.purge_interval_secs must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with_secrets() -> Config {
        let mut config = Config::default();
        config.auth.access_token.secret = Some("a".repeat(32));
        config.auth.refresh_token.secret = Some("r".repeat(32));
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.mode, ServerMode::Debug);
        assert_eq!(config.auth.session_transport, SessionTransport::Path);
        assert_eq!(config.cache.timeout(), Duration::from_millis(500));
        assert_eq!(config.cache.timeout(), DEFAULT_CACHE_TIMEOUT);
        assert_eq!(config.store.timeout(), Duration::from_secs(5));
        assert_eq!(config.store.timeout(), DEFAULT_STORE_TIMEOUT);
        assert!(!config.bootstrap.create_admin_account);
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080
            mode = "release"

            [auth]
            session_transport = "cookie"
            cookie_domain = ".example.com"

            [auth.access_token]
            secret = "access-secret-access-secret-0001"
            ttl_secs = 600

            [auth.refresh_token]
            algorithm = "EdDSA"
            private_key_path = "keys/refresh.pem"
            public_key_path = "keys/refresh.pub"
            ttl_secs = 86400

            [store]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.mode, ServerMode::Release);
        assert_eq!(config.auth.session_transport, SessionTransport::Cookie);
        assert_eq!(config.auth.access_token.ttl_secs, 600);
        assert_eq!(config.auth.access_token.algorithm, "HS256");
        assert_eq!(config.auth.refresh_token.algorithm, "EdDSA");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        // Untouched sections keep defaults
        assert_eq!(config.cache.timeout_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ARES_PORT", "9090"),
            ("ARES_MODE", "release"),
            ("ARES_STORE_PATH", "/var/lib/ares.db"),
            ("ARES_ACCESS_TOKEN_SECRET", "from-env-access"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.mode, ServerMode::Release);
        assert_eq!(config.store.path, "/var/lib/ares.db");
        assert_eq!(config.auth.access_token.secret.as_deref(), Some("from-env-access"));
        assert!(config.auth.refresh_token.secret.is_none());
    }

    #[test]
    fn test_bad_env_port_rejected() {
        let mut config = Config::default();
        let result = config.apply_env(|key| (key == "ARES_PORT").then(|| "not-a-port".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_key_material() {
        assert!(Config::default().validate().is_err());
        assert!(with_secrets().validate().is_ok());

        let mut config = with_secrets();
        config.auth.refresh_token.algorithm = "RS256".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ttls() {
        let mut config = with_secrets();
        config.auth.access_token.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = with_secrets();
        config.auth.access_token.ttl_secs = 3600;
        config.auth.refresh_token.ttl_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = with_secrets();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(&"a".repeat(32)));
        assert!(debug.contains("<redacted>"));
    }
}
