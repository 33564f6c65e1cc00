//! Auth configuration and shared state.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::api::email::EmailSender;
use super::store::AuthStore;

const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_WINDOW_SECONDS: i64 = 15 * 60;
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 14 * 24 * 60 * 60;
const DEFAULT_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_IDLE_TIMEOUT_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_SWEEP_BATCH_LIMIT: i64 = 500;
const DEFAULT_SWEEP_GRACE_SECONDS: i64 = 60;

/// Minimum length in bytes for the HS256 signing secret.
pub const MIN_SIGNING_SECRET_BYTES: usize = 32;

#[derive(Clone)]
pub struct AuthConfig {
    signing_secret: SecretString,
    cookie_domain: Option<String>,
    cookie_secure: bool,
    lockout_threshold: u32,
    lockout_window_seconds: i64,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    code_ttl_seconds: i64,
    idle_timeout_seconds: i64,
    sweep_interval_seconds: u64,
    sweep_batch_limit: i64,
    sweep_grace_seconds: i64,
}

impl AuthConfig {
    /// Build a configuration with defaults.
    ///
    /// # Errors
    ///
    /// Fails when the signing secret is shorter than
    /// [`MIN_SIGNING_SECRET_BYTES`]; a short HMAC key weakens every access
    /// token at once.
    pub fn new(signing_secret: SecretString) -> anyhow::Result<Self> {
        if signing_secret.expose_secret().len() < MIN_SIGNING_SECRET_BYTES {
            anyhow::bail!(
                "signing secret must be at least {MIN_SIGNING_SECRET_BYTES} bytes"
            );
        }

        Ok(Self {
            signing_secret,
            cookie_domain: None,
            cookie_secure: false,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window_seconds: DEFAULT_LOCKOUT_WINDOW_SECONDS,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            sweep_batch_limit: DEFAULT_SWEEP_BATCH_LIMIT,
            sweep_grace_seconds: DEFAULT_SWEEP_GRACE_SECONDS,
        })
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u32) -> Self {
        self.lockout_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_window_seconds(mut self, seconds: i64) -> Self {
        self.lockout_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_idle_timeout_seconds(mut self, seconds: i64) -> Self {
        self.idle_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_sweep_batch_limit(mut self, limit: i64) -> Self {
        self.sweep_batch_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_sweep_grace_seconds(mut self, seconds: i64) -> Self {
        self.sweep_grace_seconds = seconds;
        self
    }

    pub(crate) fn signing_secret(&self) -> &[u8] {
        self.signing_secret.expose_secret().as_bytes()
    }

    pub(crate) fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    pub(crate) fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_window_seconds(&self) -> i64 {
        self.lockout_window_seconds
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl_seconds
    }

    #[must_use]
    pub fn idle_timeout_seconds(&self) -> i64 {
        self.idle_timeout_seconds
    }

    #[must_use]
    pub fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }

    #[must_use]
    pub fn sweep_batch_limit(&self) -> i64 {
        self.sweep_batch_limit
    }

    #[must_use]
    pub fn sweep_grace_seconds(&self) -> i64 {
        self.sweep_grace_seconds
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_secret", &"[REDACTED]")
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_secure", &self.cookie_secure)
            .field("lockout_threshold", &self.lockout_threshold)
            .field("lockout_window_seconds", &self.lockout_window_seconds)
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field("sweep_batch_limit", &self.sweep_batch_limit)
            .field("sweep_grace_seconds", &self.sweep_grace_seconds)
            .finish()
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn AuthStore>,
    email: Arc<dyn EmailSender>,
}

impl AuthState {
    pub fn new(config: AuthConfig, store: Arc<dyn AuthStore>, email: Arc<dyn EmailSender>) -> Self {
        Self {
            config,
            store,
            email,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    pub(crate) fn email(&self) -> &dyn EmailSender {
        self.email.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::store::MemoryAuthStore;

    fn secret() -> SecretString {
        SecretString::from("0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = AuthConfig::new(secret()).unwrap();

        assert_eq!(config.lockout_threshold(), DEFAULT_LOCKOUT_THRESHOLD);
        assert_eq!(
            config.lockout_window_seconds(),
            DEFAULT_LOCKOUT_WINDOW_SECONDS
        );
        assert_eq!(config.access_ttl_seconds(), DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(config.refresh_ttl_seconds(), DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(config.code_ttl_seconds(), DEFAULT_CODE_TTL_SECONDS);
        assert!(!config.cookie_secure());
        assert_eq!(config.cookie_domain(), None);

        let config = config
            .with_lockout_threshold(3)
            .with_lockout_window_seconds(60)
            .with_access_ttl_seconds(120)
            .with_refresh_ttl_seconds(3600)
            .with_code_ttl_seconds(90)
            .with_idle_timeout_seconds(300)
            .with_sweep_interval_seconds(5)
            .with_sweep_batch_limit(10)
            .with_cookie_domain(Some("api.test".to_string()))
            .with_cookie_secure(true);

        assert_eq!(config.lockout_threshold(), 3);
        assert_eq!(config.lockout_window_seconds(), 60);
        assert_eq!(config.access_ttl_seconds(), 120);
        assert_eq!(config.refresh_ttl_seconds(), 3600);
        assert_eq!(config.code_ttl_seconds(), 90);
        assert_eq!(config.idle_timeout_seconds(), 300);
        assert_eq!(config.sweep_interval_seconds(), 5);
        assert_eq!(config.sweep_batch_limit(), 10);
        assert_eq!(config.cookie_domain(), Some("api.test"));
        assert!(config.cookie_secure());
    }

    #[test]
    fn short_signing_secret_is_rejected() {
        let result = AuthConfig::new(SecretString::from("too-short"));
        assert!(result.is_err());
    }

    #[test]
    fn zero_thresholds_are_clamped() {
        let config = AuthConfig::new(secret())
            .unwrap()
            .with_lockout_threshold(0)
            .with_sweep_interval_seconds(0)
            .with_sweep_batch_limit(0);
        assert_eq!(config.lockout_threshold(), 1);
        assert_eq!(config.sweep_interval_seconds(), 1);
        assert_eq!(config.sweep_batch_limit(), 1);
    }

    #[test]
    fn debug_redacts_secret() {
        let config = AuthConfig::new(secret()).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("0123456789abcdef"));
    }

    #[test]
    fn auth_state_exposes_parts() {
        let config = AuthConfig::new(secret()).unwrap();
        let state = AuthState::new(
            config,
            Arc::new(MemoryAuthStore::new()),
            Arc::new(LogEmailSender),
        );
        assert_eq!(state.config().lockout_threshold(), DEFAULT_LOCKOUT_THRESHOLD);
    }
}
