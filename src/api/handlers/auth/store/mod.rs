//! Storage seam for accounts, sessions and verification codes.
//!
//! [`PgAuthStore`] is the production backend; [`MemoryAuthStore`] backs unit
//! and integration tests without a database. Both implement the same
//! [`AuthStore`] trait, and the compare-and-swap rotation contract is part of
//! the trait, not the backend.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::principal::CapabilitySet;

mod memory;
mod postgres;

pub use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub capabilities: CapabilitySet,
    pub active: bool,
    pub email_verified: bool,
    pub failed_logins: i32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub refresh_hash: Vec<u8>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub account_id: Uuid,
    pub refresh_hash: Vec<u8>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Result of counting one failed sign-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Attempt counted; this many attempts remain before lockout.
    Counted { remaining: u32 },
    /// The attempt crossed the threshold and the account is now locked.
    LockedOut { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePurpose {
    VerifyEmail,
    ResetPassword,
}

impl CodePurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify-email",
            Self::ResetPassword => "reset-password",
        }
    }
}

/// Result of attempting to consume a verification code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOutcome {
    /// Code matched and is now consumed.
    Consumed,
    /// No code with this hash exists for the (email, purpose) pair.
    Invalid,
    /// Code matched but its TTL has passed.
    Expired,
    /// Code matched but was consumed earlier.
    AlreadyConsumed,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn find_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>>;

    /// Count one failed attempt atomically. Crossing `threshold` sets
    /// `lockout_until = now + window`. Concurrent wrong-password attempts
    /// must each consume exactly one attempt.
    async fn record_sign_in_failure(
        &self,
        account_id: Uuid,
        threshold: u32,
        lockout_window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome>;

    /// Reset the failure counter and drop any lockout.
    async fn clear_lockout(&self, account_id: Uuid) -> Result<()>;

    /// Successful sign-in: reset the counter and stamp `last_login_at`.
    async fn record_sign_in_success(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    async fn insert_session(&self, session: NewSession, now: DateTime<Utc>) -> Result<()>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>>;

    /// Compare-and-swap rotation: replace `current_hash` with `new_hash` in
    /// the same row, extending expiry and activity. Returns `false` when the
    /// row no longer carries `current_hash` (someone else rotated first) or
    /// is inactive. At most one of two concurrent calls may return `true`.
    async fn rotate_session(
        &self,
        session_id: Uuid,
        current_hash: &[u8],
        new_hash: &[u8],
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Bump `last_activity_at`.
    async fn touch_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Returns `true` if the session existed and was active.
    async fn deactivate_session(&self, session_id: Uuid) -> Result<bool>;

    /// Deactivate every active session of the account; returns the count.
    async fn deactivate_all(&self, account_id: Uuid) -> Result<u64>;

    /// Active sessions of the account, most recent activity first.
    async fn list_sessions(&self, account_id: Uuid) -> Result<Vec<SessionRecord>>;

    /// Deactivate sessions expired past `grace_seconds` or idle past
    /// `idle_timeout_seconds`, at most `limit` rows. Returns the count.
    async fn sweep_sessions(
        &self,
        now: DateTime<Utc>,
        grace_seconds: i64,
        idle_timeout_seconds: i64,
        limit: i64,
    ) -> Result<u64>;

    /// Store a fresh code hash, superseding any unconsumed code for the same
    /// (email, purpose) pair.
    async fn store_verification_code(
        &self,
        email: &str,
        purpose: CodePurpose,
        code_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Single-use consumption; see [`CodeOutcome`] for the taxonomy.
    async fn consume_verification_code(
        &self,
        email: &str,
        purpose: CodePurpose,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<CodeOutcome>;

    /// Returns `true` if an account with this email existed.
    async fn mark_email_verified(&self, email: &str) -> Result<bool>;

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Cheap liveness check for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
