//! Authentication Service
//! Mission: Login, registration, refresh and logout over the codec, cache and account store
//!
//! Refresh tokens are not rotated: `refresh` mints a new access token and leaves
//! the refresh token and its cache entry untouched until logout or TTL expiry.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jwt::{unquote, TokenClass, TokenCodec};
use super::models::{
    Account, AuthResponse, LoginRequest, PublicAccount, RefreshResponse, RegisterRequest,
};
use super::password::PasswordHasher;
use super::session::{key_hint, CacheError, SessionCache};
use crate::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::bootstrap::ADMIN_USERNAME;
use crate::error::{ApiError, ApiResult};
use crate::store::Documents;

const PASSWORD_MIN_LEN: usize = 8;
const PASSWORD_MAX_LEN: usize = 64;
const USERNAME_MAX_LEN: usize = 32;

pub struct AuthService {
    accounts: Documents<Account>,
    cache: Arc<dyn SessionCache>,
    codec: Arc<TokenCodec>,
    hasher: PasswordHasher,
    audit: AuditLog,
}

fn validate_username(username: &str) -> ApiResult<()> {
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if username.is_empty() || username.len() > USERNAME_MAX_LEN || !valid_chars {
        return Err(ApiError::bad_request("username must be alphanumeric"));
    }
    Ok(())
}

fn validate_email(email: &str) -> ApiResult<()> {
    let invalid = || ApiError::bad_request("email is invalid");

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) || !tld_ok {
        return Err(invalid());
    }
    Ok(())
}

fn validate_password(password: &str) -> ApiResult<()> {
    let len = password.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
        return Err(ApiError::bad_request(format!(
            "password must be {PASSWORD_MIN_LEN}-{PASSWORD_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn unquote_token(raw: &str) -> ApiResult<&str> {
    unquote(raw).ok_or_else(|| ApiError::bad_request("failed to unquote token"))
}

impl AuthService {
    pub fn new(
        accounts: Documents<Account>,
        cache: Arc<dyn SessionCache>,
        codec: Arc<TokenCodec>,
        hasher: PasswordHasher,
        audit: AuditLog,
    ) -> Self {
        Self {
            accounts,
            cache,
            codec,
            hasher,
            audit,
        }
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Authenticate with email/password and open a session
    pub async fn login(&self, req: &LoginRequest, ip: Option<&str>) -> ApiResult<AuthResponse> {
        let account = self
            .accounts
            .find_optional_by_field("email", req.email.as_str())
            .await
            .map_err(|e| ApiError::from_store("account", e))?;

        let Some(account) = account else {
            // Same bcrypt work as a wrong password.
            self.hasher.verify_decoy(&req.password).await;
            debug!("Login rejected: no account for submitted email");
            return Err(ApiError::InvalidCredentials);
        };

        if !self
            .hasher
            .verify_async(&req.password, &account.password_hash)
            .await
        {
            warn!("❌ Login failed: password mismatch for account {}", account.id);
            return Err(ApiError::InvalidCredentials);
        }

        let response = self.open_session(&account).await?;

        self.audit
            .record(AuditEntry::new(account.id, AuditEvent::AuthWithCredentials).ip(ip))
            .await;
        info!("✅ Login successful: {} ({})", account.username, account.id);

        Ok(response)
    }

    /// Create a standard account, then sign it in
    pub async fn register(&self, req: &RegisterRequest, ip: Option<&str>) -> ApiResult<AuthResponse> {
        validate_username(&req.username)?;
        validate_email(&req.email)?;
        validate_password(&req.password)?;

        if req.username.eq_ignore_ascii_case(ADMIN_USERNAME) {
            return Err(ApiError::conflict("username is in use"));
        }

        let by_email = self
            .accounts
            .find_optional_by_field("email", req.email.as_str())
            .await
            .map_err(|e| ApiError::from_store("account", e))?;
        if by_email.is_some() {
            return Err(ApiError::conflict("email is in use"));
        }

        let by_username = self
            .accounts
            .find_optional_by_field("username", req.username.as_str())
            .await
            .map_err(|e| ApiError::from_store("account", e))?;
        if by_username.is_some() {
            return Err(ApiError::conflict("username is in use"));
        }

        let password_hash = self
            .hasher
            .hash_async(&req.password)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))?;

        let account = Account::new_standard(&req.username, &req.email, password_hash);
        self.accounts
            .insert(&account)
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to insert account: {e}")))?;

        let response = self.open_session(&account).await?;

        self.audit
            .record(AuditEntry::new(account.id, AuditEvent::CreateAccount).ip(ip))
            .await;
        info!("👤 Account created: {} ({})", account.username, account.id);

        Ok(response)
    }

    /// Issue a token pair and track the refresh token in the session cache.
    /// A cache failure fails the whole operation.
    async fn open_session(&self, account: &Account) -> ApiResult<AuthResponse> {
        let subject = account.id.to_string();
        let token = self
            .codec
            .issue(TokenClass::Access, &subject)
            .map_err(|e| ApiError::Internal(format!("failed to generate auth token: {e}")))?;
        let refresh_token = self
            .codec
            .issue(TokenClass::Refresh, &subject)
            .map_err(|e| ApiError::Internal(format!("failed to generate refresh token: {e}")))?;

        self.cache
            .put(&refresh_token, &subject, self.codec.ttl(TokenClass::Refresh))
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to cache refresh token: {e}")))?;

        Ok(AuthResponse {
            account: PublicAccount::from(account),
            token,
            refresh_token,
        })
    }

    /// Verify a refresh token against the cache and mint a new access token
    pub async fn refresh(&self, raw_token: &str) -> ApiResult<RefreshResponse> {
        let refresh_token = unquote_token(raw_token)?;

        // Signature and expiry first; a bad token never reaches the cache.
        let subject = self
            .codec
            .verify_subject(TokenClass::Refresh, refresh_token)
            .map_err(|e| {
                debug!("Refresh rejected: {}", e);
                ApiError::InvalidSession
            })?;

        match self.cache.get(refresh_token).await {
            Ok(cached) if cached == subject => {}
            Ok(_) => {
                warn!(
                    key = key_hint(refresh_token),
                    "Refresh rejected: cached subject does not match token"
                );
                return Err(ApiError::InvalidSession);
            }
            Err(CacheError::NotFound) => {
                debug!(key = key_hint(refresh_token), "Refresh rejected: session not cached");
                return Err(ApiError::InvalidSession);
            }
            Err(e) => {
                warn!(key = key_hint(refresh_token), "Refresh rejected: cache lookup failed: {}", e);
                return Err(ApiError::InvalidSession);
            }
        }

        let account_id = Uuid::parse_str(&subject).map_err(|_| ApiError::InvalidSession)?;
        self.accounts
            .find_by_id(account_id)
            .await
            .map_err(|e| ApiError::from_store("account", e))?;

        let access_token = self
            .codec
            .issue(TokenClass::Access, &subject)
            .map_err(|e| ApiError::Internal(format!("failed to generate new access token: {e}")))?;

        debug!("Refreshed access token for account {}", account_id);
        Ok(RefreshResponse { access_token })
    }

    /// Revoke exactly the presented refresh token
    pub async fn logout(&self, raw_token: &str, ip: Option<&str>) -> ApiResult<()> {
        let refresh_token = unquote_token(raw_token)?;

        let subject = self
            .codec
            .verify_subject(TokenClass::Refresh, refresh_token)
            .map_err(|e| {
                debug!("Logout rejected: {}", e);
                ApiError::InvalidSession
            })?;

        let deleted = self
            .cache
            .delete(refresh_token)
            .await
            .map_err(|e| ApiError::Dependency(format!("failed to delete from cache: {e}")))?;

        if deleted == 0 {
            return Err(ApiError::not_found("session not found"));
        }

        if let Ok(account_id) = Uuid::parse_str(&subject) {
            self.audit
                .record(AuditEntry::new(account_id, AuditEvent::Logout).ip(ip))
                .await;
        }
        info!("👋 Logout: session closed for account {}", subject);

        Ok(())
    }

    /// Public projection of an already authenticated account
    pub async fn authenticate_with_token(&self, account_id: Uuid) -> ApiResult<PublicAccount> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await
            .map_err(|e| ApiError::from_store("account", e))?;
        Ok(PublicAccount::from(&account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::{claims, sign_raw, test_codec, TEST_REFRESH_SECRET};
    use crate::auth::session::MemorySessionCache;
    use crate::store::{DocumentStore, MemoryDocumentStore};
    use async_trait::async_trait;
    use jsonwebtoken::Algorithm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct Harness {
        service: AuthService,
        accounts: Documents<Account>,
        cache: MemorySessionCache,
    }

    fn harness_with_cache(cache: Arc<dyn SessionCache>, memory: MemorySessionCache) -> Harness {
        harness_with(cache, memory, PasswordHasher::new(4))
    }

    fn harness_with(
        cache: Arc<dyn SessionCache>,
        memory: MemorySessionCache,
        hasher: PasswordHasher,
    ) -> Harness {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let accounts = Documents::new(store.clone());
        let service = AuthService::new(
            accounts.clone(),
            cache,
            Arc::new(test_codec()),
            hasher,
            AuditLog::new(store),
        );
        Harness {
            service,
            accounts,
            cache: memory,
        }
    }

    fn harness() -> Harness {
        let cache = MemorySessionCache::new();
        harness_with_cache(Arc::new(cache.clone()), cache)
    }

    fn register_req(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: "correct-horse".into(),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    struct FailingCache;

    #[async_trait]
    impl SessionCache for FailingCache {
        async fn put(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _: &str) -> Result<String, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    /// Memory cache that counts lookups.
    #[derive(Clone, Default)]
    struct CountingCache {
        inner: MemorySessionCache,
        gets: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionCache for CountingCache {
        async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
            self.inner.put(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> Result<String, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> Result<u64, CacheError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let h = harness();
        let registered = h
            .service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();
        assert_eq!(registered.account.username, "lifter");

        let login = h
            .service
            .login(&login_req("lifter@example.com", "correct-horse"), Some("127.0.0.1"))
            .await
            .unwrap();

        let subject = h
            .service
            .codec()
            .verify_subject(TokenClass::Access, &login.token)
            .unwrap();
        assert_eq!(subject, login.account.id.to_string());
        assert_eq!(login.account.id, registered.account.id);
        // Both sessions are tracked independently
        assert_eq!(h.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let h = harness();
        h.service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();

        let wrong_password = h
            .service
            .login(&login_req("lifter@example.com", "wrong-horse"), None)
            .await
            .unwrap_err();
        let unknown = h
            .service
            .login(&login_req("ghost@example.com", "correct-horse"), None)
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, ApiError::InvalidCredentials));
        assert!(matches!(unknown, ApiError::InvalidCredentials));
        assert_eq!(wrong_password.public_message(), unknown.public_message());
    }

    #[tokio::test]
    async fn test_register_conflicts_and_validation() {
        let h = harness();
        h.service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();

        let dup_email = h
            .service
            .register(&register_req("other", "lifter@example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(dup_email, ApiError::Conflict(ref m) if m == "email is in use"));

        let dup_name = h
            .service
            .register(&register_req("lifter", "other@example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(dup_name, ApiError::Conflict(ref m) if m == "username is in use"));

        let bad_name = h
            .service
            .register(&register_req("bad name!", "x@example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(bad_name, ApiError::BadRequest(_)));

        let mut short = register_req("shorty", "shorty@example.com");
        short.password = "short".into();
        assert!(matches!(
            h.service.register(&short, None).await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_refresh_then_logout_revokes() {
        let h = harness();
        let session = h
            .service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();

        let refreshed = h.service.refresh(&session.refresh_token).await.unwrap();
        let subject = h
            .service
            .codec()
            .verify_subject(TokenClass::Access, &refreshed.access_token)
            .unwrap();
        assert_eq!(subject, session.account.id.to_string());

        // Refresh does not rotate; the same token keeps working
        h.service.refresh(&session.refresh_token).await.unwrap();

        h.service.logout(&session.refresh_token, None).await.unwrap();

        let after = h.service.refresh(&session.refresh_token).await.unwrap_err();
        assert!(matches!(after, ApiError::InvalidSession));

        let again = h.service.logout(&session.refresh_token, None).await.unwrap_err();
        assert!(matches!(again, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token_and_garbage() {
        let h = harness();
        let session = h
            .service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();

        assert!(matches!(
            h.service.refresh(&session.token).await.unwrap_err(),
            ApiError::InvalidSession
        ));
        assert!(matches!(
            h.service.refresh("garbage").await.unwrap_err(),
            ApiError::InvalidSession
        ));
        assert!(matches!(
            h.service.refresh("\"unbalanced").await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_refresh_accepts_quoted_token() {
        let h = harness();
        let session = h
            .service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();

        let quoted = format!("\"{}\"", session.refresh_token);
        assert!(h.service.refresh(&quoted).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_for_deleted_account_is_not_found() {
        let h = harness();
        let session = h
            .service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();
        h.accounts.delete(session.account.id).await.unwrap();

        assert!(matches!(
            h.service.refresh(&session.refresh_token).await.unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_cache_failure_is_fatal_to_login() {
        let h = harness_with_cache(Arc::new(FailingCache), MemorySessionCache::new());
        let hash = PasswordHasher::new(4).hash("correct-horse").unwrap();
        let account = Account::new_standard("lifter", "lifter@example.com", hash);
        h.accounts.insert(&account).await.unwrap();

        let err = h
            .service
            .login(&login_req("lifter@example.com", "correct-horse"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Dependency(_)));
    }

    #[tokio::test]
    async fn test_introspection() {
        let h = harness();
        let session = h
            .service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();

        let public = h
            .service
            .authenticate_with_token(session.account.id)
            .await
            .unwrap();
        assert_eq!(public, session.account);

        assert!(matches!(
            h.service.authenticate_with_token(Uuid::new_v4()).await.unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_rejected_refresh_tokens_never_reach_cache() {
        let counting = CountingCache::default();
        let h = harness_with_cache(Arc::new(counting.clone()), counting.inner.clone());
        let session = h
            .service
            .register(&register_req("lifter", "lifter@example.com"), None)
            .await
            .unwrap();
        let subject = session.account.id.to_string();

        let expired = sign_raw(Algorithm::HS256, TEST_REFRESH_SECRET, &claims(Some(&subject), -120));

        let (head, signature) = session.refresh_token.rsplit_once('.').unwrap();
        let flipped = if signature.starts_with('a') { "b" } else { "a" };
        let tampered = format!("{head}.{flipped}{}", &signature[1..]);

        for token in [session.token.as_str(), "garbage", expired.as_str(), tampered.as_str()] {
            assert!(
                matches!(h.service.refresh(token).await, Err(ApiError::InvalidSession)),
                "token {token} was not rejected"
            );
        }
        assert_eq!(counting.gets.load(Ordering::SeqCst), 0);

        h.service.refresh(&session.refresh_token).await.unwrap();
        assert_eq!(counting.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_failure_rejects_refresh() {
        let h = harness_with_cache(Arc::new(FailingCache), MemorySessionCache::new());
        let hash = PasswordHasher::new(4).hash("correct-horse").unwrap();
        let account = Account::new_standard("lifter", "lifter@example.com", hash);
        h.accounts.insert(&account).await.unwrap();

        let refresh_token = h
            .service
            .codec()
            .issue(TokenClass::Refresh, &account.id.to_string())
            .unwrap();

        assert!(matches!(
            h.service.refresh(&refresh_token).await.unwrap_err(),
            ApiError::InvalidSession
        ));
    }

    #[tokio::test]
    async fn test_admin_username_is_reserved() {
        let h = harness();
        for username in ["admin", "Admin", "ADMIN"] {
            let err = h
                .service
                .register(&register_req(username, "someone@example.com"), None)
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::Conflict(ref m) if m == "username is in use"));
        }
        assert!(h.accounts.find_optional_by_field("username", "admin").await.unwrap().is_none());

        h.service
            .register(&register_req("administrator", "someone@example.com"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_email_still_pays_for_bcrypt() {
        let hasher = PasswordHasher::new(8);
        let cache = MemorySessionCache::new();
        let h = harness_with(Arc::new(cache.clone()), cache, hasher.clone());
        let hash = hasher.hash("correct-horse").unwrap();
        h.accounts
            .insert(&Account::new_standard("lifter", "lifter@example.com", hash.clone()))
            .await
            .unwrap();

        let started = Instant::now();
        assert!(!hasher.verify("wrong-horse", &hash));
        let one_verify = started.elapsed();

        let started = Instant::now();
        let err = h
            .service
            .login(&login_req("ghost@example.com", "wrong-horse"), None)
            .await
            .unwrap_err();
        let unknown_email = started.elapsed();

        assert!(matches!(err, ApiError::InvalidCredentials));
        assert!(
            unknown_email >= one_verify / 4,
            "unknown email took {unknown_email:?}, one verify takes {one_verify:?}"
        );
    }

    #[test]
    fn test_email_validation() {
        assert!(validate_email("lifter@example.com").is_ok());
        assert!(validate_email("first.last@gym.co.uk").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@@example.com").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }
}
