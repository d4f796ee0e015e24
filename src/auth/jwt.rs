//! Token Codec
//! Mission: Issue and verify access/refresh JWTs with independent key material
//!
//! Each token class carries its own algorithm, keys and TTL so one can be
//! rotated without invalidating the other. Verification pins the algorithm
//! family of the configured key: `none` and cross-family headers are rejected
//! before any signature work happens.

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::Deserialize;
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::auth::models::TokenClaims;
use crate::config::{AuthConfig, TokenKeyConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("unexpected signing algorithm: {0}")]
    UnexpectedAlgorithm(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidAlgorithm => TokenError::UnexpectedAlgorithm("mismatch".into()),
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::MissingRequiredClaim(_) => TokenError::MissingClaim("exp"),
            _ => TokenError::Malformed,
        }
    }
}

/// Token class; each has its own keys and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Access,
    Refresh,
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Algorithms verifiable with a key configured for `algorithm`.
fn family(algorithm: Algorithm) -> &'static [Algorithm] {
    use Algorithm::*;
    match algorithm {
        HS256 | HS384 | HS512 => &[HS256, HS384, HS512],
        RS256 | RS384 | RS512 | PS256 | PS384 | PS512 => {
            &[RS256, RS384, RS512, PS256, PS384, PS512]
        }
        ES256 | ES384 => &[ES256, ES384],
        EdDSA => &[EdDSA],
    }
}

/// Reads `alg` straight from the header segment. `jsonwebtoken` refuses to
/// parse headers naming algorithms it does not know (such as `none`), which
/// would otherwise surface as a generic parse error.
fn header_algorithm(token: &str) -> Result<String, TokenError> {
    #[derive(Deserialize)]
    struct RawHeader {
        alg: String,
    }

    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    let raw: RawHeader = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;
    Ok(raw.alg)
}

/// Strips one layer of surrounding quotes left by some client serializers.
///
/// Returns `None` when the quoting is unbalanced or nested.
pub fn unquote(raw: &str) -> Option<&str> {
    match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = raw.strip_prefix(quote)?.strip_suffix(quote)?;
            (!inner.contains(|c: char| c == '"' || c == '\'')).then_some(inner)
        }
        _ => Some(raw),
    }
}

/// Key material and policy for one token class
pub struct TokenKeys {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    leeway: u64,
}

impl TokenKeys {
    pub fn hmac(algorithm: Algorithm, secret: &[u8], ttl: Duration) -> Result<Self, TokenError> {
        if !is_hmac(algorithm) {
            return Err(TokenError::Signing(format!(
                "{:?} needs a key pair, not a shared secret",
                algorithm
            )));
        }
        if secret.is_empty() {
            return Err(TokenError::Signing("empty HMAC secret".into()));
        }

        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            leeway: 0,
        })
    }

    pub fn from_pem(
        algorithm: Algorithm,
        private_pem: &[u8],
        public_pem: &[u8],
        ttl: Duration,
    ) -> Result<Self, TokenError> {
        let signing = |e: jsonwebtoken::errors::Error| TokenError::Signing(e.to_string());

        let (encoding, decoding) = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                return Err(TokenError::Signing(format!(
                    "{:?} takes a shared secret, not a key pair",
                    algorithm
                )))
            }
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => (
                EncodingKey::from_rsa_pem(private_pem).map_err(signing)?,
                DecodingKey::from_rsa_pem(public_pem).map_err(signing)?,
            ),
            Algorithm::ES256 | Algorithm::ES384 => (
                EncodingKey::from_ec_pem(private_pem).map_err(signing)?,
                DecodingKey::from_ec_pem(public_pem).map_err(signing)?,
            ),
            Algorithm::EdDSA => (
                EncodingKey::from_ed_pem(private_pem).map_err(signing)?,
                DecodingKey::from_ed_pem(public_pem).map_err(signing)?,
            ),
        };

        Ok(Self {
            algorithm,
            encoding,
            decoding,
            ttl,
            leeway: 0,
        })
    }

    /// Builds keys from configuration, reading PEM files for asymmetric algorithms.
    pub fn from_config(cfg: &TokenKeyConfig) -> anyhow::Result<Self> {
        let algorithm = Algorithm::from_str(&cfg.algorithm)
            .map_err(|_| anyhow!("unknown token algorithm {}", cfg.algorithm))?;
        let ttl = Duration::from_secs(cfg.ttl_secs);

        let keys = if is_hmac(algorithm) {
            let secret = cfg
                .secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .context("HMAC token keys need a secret")?;
            Self::hmac(algorithm, secret.as_bytes(), ttl)?
        } else {
            let private_path = cfg
                .private_key_path
                .as_ref()
                .context("asymmetric token keys need private_key_path")?;
            let public_path = cfg
                .public_key_path
                .as_ref()
                .context("asymmetric token keys need public_key_path")?;

            let private = std::fs::read(private_path)
                .with_context(|| format!("Failed to read {}", private_path.display()))?;
            let public = std::fs::read(public_path)
                .with_context(|| format!("Failed to read {}", public_path.display()))?;
            Self::from_pem(algorithm, &private, &public, ttl)?
        };

        Ok(keys.with_leeway(cfg.leeway_secs))
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway = leeway_secs;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.algorithms = family(self.algorithm).to_vec();
        validation.leeway = self.leeway;
        validation.set_required_spec_claims(&["exp"]);
        validation
    }
}

/// Signs and verifies both token classes
pub struct TokenCodec {
    access: TokenKeys,
    refresh: TokenKeys,
}

impl TokenCodec {
    pub fn new(access: TokenKeys, refresh: TokenKeys) -> Self {
        Self { access, refresh }
    }

    pub fn from_config(auth: &AuthConfig) -> anyhow::Result<Self> {
        let access = TokenKeys::from_config(&auth.access_token).context("access token keys")?;
        let refresh = TokenKeys::from_config(&auth.refresh_token).context("refresh token keys")?;
        Ok(Self::new(access, refresh))
    }

    fn keys(&self, class: TokenClass) -> &TokenKeys {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    pub fn ttl(&self, class: TokenClass) -> Duration {
        self.keys(class).ttl
    }

    /// Issue a token for `subject` that expires after the class TTL
    pub fn issue(&self, class: TokenClass, subject: &str) -> Result<String, TokenError> {
        let keys = self.keys(class);
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: Some(subject.to_string()),
            iat: now,
            exp: now + keys.ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        };

        debug!(
            "Issuing {:?} token for account {}, expires in {}s",
            class,
            subject,
            keys.ttl.as_secs()
        );

        encode(&Header::new(keys.algorithm), &claims, &keys.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, algorithm family and expiry; returns the claims
    pub fn verify(&self, class: TokenClass, token: &str) -> Result<TokenClaims, TokenError> {
        let keys = self.keys(class);

        let alg_name = header_algorithm(token)?;
        let algorithm = Algorithm::from_str(&alg_name)
            .map_err(|_| TokenError::UnexpectedAlgorithm(alg_name.clone()))?;
        if !family(keys.algorithm).contains(&algorithm) {
            return Err(TokenError::UnexpectedAlgorithm(alg_name));
        }

        let decoded = decode::<TokenClaims>(token, &keys.decoding, &keys.validation())?;

        match decoded.claims.sub.as_deref() {
            Some(sub) if !sub.is_empty() => Ok(decoded.claims),
            _ => Err(TokenError::MissingClaim("sub")),
        }
    }

    /// Verify and return only the subject claim
    pub fn verify_subject(&self, class: TokenClass, token: &str) -> Result<String, TokenError> {
        let claims = self.verify(class, token)?;
        claims.sub.ok_or(TokenError::MissingClaim("sub"))
    }
}
