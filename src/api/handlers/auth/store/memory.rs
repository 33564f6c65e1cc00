//! In-memory [`AuthStore`] backend.
//!
//! One mutex guards all tables, so every trait method is atomic the way a
//! single SQL statement is. Used by tests and available for local runs
//! without a database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Account, AuthStore, CodeOutcome, CodePurpose, FailureOutcome, NewSession, SessionRecord,
};

#[derive(Debug, Clone)]
struct CodeRecord {
    code_hash: Vec<u8>,
    consumed: bool,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    sessions: HashMap<Uuid, SessionRecord>,
    codes: HashMap<(String, &'static str), CodeRecord>,
}

#[derive(Default)]
pub struct MemoryAuthStore {
    inner: Mutex<Inner>,
}

impl MemoryAuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account. Test setup only; production accounts come from the
    /// provisioning flows outside this crate.
    pub async fn insert_account(&self, account: Account) {
        let mut inner = self.inner.lock().await;
        inner.accounts.insert(account.id, account);
    }

    /// Number of active sessions across all accounts.
    pub async fn active_session_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.sessions.values().filter(|s| s.active).count()
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(&account_id).cloned())
    }

    async fn record_sign_in_failure(
        &self,
        account_id: Uuid,
        threshold: u32,
        lockout_window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow::anyhow!("unknown account {account_id}"))?;

        account.failed_logins += 1;
        let failures = u32::try_from(account.failed_logins).unwrap_or(u32::MAX);
        if failures >= threshold {
            let until = now + Duration::seconds(lockout_window_seconds);
            account.lockout_until = Some(until);
            Ok(FailureOutcome::LockedOut { until })
        } else {
            Ok(FailureOutcome::Counted {
                remaining: threshold - failures,
            })
        }
    }

    async fn clear_lockout(&self, account_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.get_mut(&account_id) {
            account.failed_logins = 0;
            account.lockout_until = None;
        }
        Ok(())
    }

    async fn record_sign_in_success(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.get_mut(&account_id) {
            account.failed_logins = 0;
            account.lockout_until = None;
            account.last_login_at = Some(now);
        }
        Ok(())
    }

    async fn insert_session(&self, session: NewSession, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            session.id,
            SessionRecord {
                id: session.id,
                account_id: session.account_id,
                refresh_hash: session.refresh_hash,
                ip: session.ip,
                user_agent: session.user_agent,
                active: true,
                expires_at: session.expires_at,
                last_activity_at: now,
                created_at: now,
            },
        );
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(&session_id).cloned())
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        current_hash: &[u8],
        new_hash: &[u8],
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        if !session.active || session.refresh_hash != current_hash {
            return Ok(false);
        }
        session.refresh_hash = new_hash.to_vec();
        session.expires_at = new_expires_at;
        session.last_activity_at = now;
        Ok(true)
    }

    async fn touch_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            session.last_activity_at = now;
        }
        Ok(())
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&session_id) {
            Some(session) if session.active => {
                session.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_all(&self, account_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for session in inner.sessions.values_mut() {
            if session.account_id == account_id && session.active {
                session.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_sessions(&self, account_id: Uuid) -> Result<Vec<SessionRecord>> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|session| session.account_id == account_id && session.active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn sweep_sessions(
        &self,
        now: DateTime<Utc>,
        grace_seconds: i64,
        idle_timeout_seconds: i64,
        limit: i64,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut count: u64 = 0;
        for session in inner.sessions.values_mut() {
            if count >= u64::try_from(limit).unwrap_or(u64::MAX) {
                break;
            }
            if !session.active {
                continue;
            }
            let expired = session.expires_at + Duration::seconds(grace_seconds) <= now;
            let idle = session.last_activity_at + Duration::seconds(idle_timeout_seconds) <= now;
            if expired || idle {
                session.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn store_verification_code(
        &self,
        email: &str,
        purpose: CodePurpose,
        code_hash: &[u8],
        expires_at: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // A new request supersedes any prior code for the pair.
        inner.codes.insert(
            (email.to_string(), purpose.as_str()),
            CodeRecord {
                code_hash: code_hash.to_vec(),
                consumed: false,
                expires_at,
            },
        );
        Ok(())
    }

    async fn consume_verification_code(
        &self,
        email: &str,
        purpose: CodePurpose,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<CodeOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.codes.get_mut(&(email.to_string(), purpose.as_str())) else {
            return Ok(CodeOutcome::Invalid);
        };
        if record.code_hash != code_hash {
            return Ok(CodeOutcome::Invalid);
        }
        if record.consumed {
            return Ok(CodeOutcome::AlreadyConsumed);
        }
        if record.expires_at <= now {
            return Ok(CodeOutcome::Expired);
        }
        record.consumed = true;
        Ok(CodeOutcome::Consumed)
    }

    async fn mark_email_verified(&self, email: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        for account in inner.accounts.values_mut() {
            if account.email == email {
                account.email_verified = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.get_mut(&account_id) {
            account.password_hash = password_hash.to_string();
            account.password_changed_at = Some(now);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::principal::CapabilitySet;

    fn account(id: u128, email: &str) -> Account {
        Account {
            id: Uuid::from_u128(id),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "member".to_string(),
            capabilities: CapabilitySet::default(),
            active: true,
            email_verified: true,
            failed_logins: 0,
            lockout_until: None,
            last_login_at: None,
            password_changed_at: None,
        }
    }

    fn session(id: u128, account_id: u128, hash: &[u8], expires_at: DateTime<Utc>) -> NewSession {
        NewSession {
            id: Uuid::from_u128(id),
            account_id: Uuid::from_u128(account_id),
            refresh_hash: hash.to_vec(),
            ip: None,
            user_agent: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn failure_counter_locks_at_threshold() {
        let store = MemoryAuthStore::new();
        store.insert_account(account(1, "a@test")).await;
        let id = Uuid::from_u128(1);
        let now = Utc::now();

        assert_eq!(
            store.record_sign_in_failure(id, 3, 60, now).await.unwrap(),
            FailureOutcome::Counted { remaining: 2 }
        );
        assert_eq!(
            store.record_sign_in_failure(id, 3, 60, now).await.unwrap(),
            FailureOutcome::Counted { remaining: 1 }
        );
        let outcome = store.record_sign_in_failure(id, 3, 60, now).await.unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::LockedOut {
                until: now + Duration::seconds(60)
            }
        );

        store.record_sign_in_success(id, now).await.unwrap();
        let account = store.find_account_by_id(id).await.unwrap().unwrap();
        assert_eq!(account.failed_logins, 0);
        assert!(account.lockout_until.is_none());
        assert_eq!(account.last_login_at, Some(now));
    }

    #[tokio::test]
    async fn rotation_is_compare_and_swap() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        let expires = now + Duration::hours(1);
        store.insert_session(session(10, 1, b"h1", expires), now).await.unwrap();
        let sid = Uuid::from_u128(10);

        assert!(store.rotate_session(sid, b"h1", b"h2", expires, now).await.unwrap());
        // Second rotation with the stale hash loses.
        assert!(!store.rotate_session(sid, b"h1", b"h3", expires, now).await.unwrap());
        // The winner's hash is current.
        let record = store.find_session(sid).await.unwrap().unwrap();
        assert_eq!(record.refresh_hash, b"h2");
    }

    #[tokio::test]
    async fn rotation_fails_on_inactive_session() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        let expires = now + Duration::hours(1);
        store.insert_session(session(10, 1, b"h1", expires), now).await.unwrap();
        let sid = Uuid::from_u128(10);

        assert!(store.deactivate_session(sid).await.unwrap());
        assert!(!store.deactivate_session(sid).await.unwrap());
        assert!(!store.rotate_session(sid, b"h1", b"h2", expires, now).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_deactivates_expired_and_idle() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();

        // Expired beyond grace.
        store
            .insert_session(session(1, 1, b"a", now - Duration::seconds(120)), now - Duration::seconds(130))
            .await
            .unwrap();
        // Idle beyond the timeout but not expired.
        store
            .insert_session(session(2, 1, b"b", now + Duration::hours(1)), now - Duration::seconds(500))
            .await
            .unwrap();
        // Healthy.
        store
            .insert_session(session(3, 1, b"c", now + Duration::hours(1)), now)
            .await
            .unwrap();

        let swept = store.sweep_sessions(now, 60, 300, 100).await.unwrap();
        assert_eq!(swept, 2);
        assert_eq!(store.active_session_count().await, 1);

        // Second pass finds nothing.
        assert_eq!(store.sweep_sessions(now, 60, 300, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_respects_batch_limit() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert_session(
                    session(i, 1, b"x", now - Duration::seconds(120)),
                    now - Duration::seconds(130),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.sweep_sessions(now, 60, 300, 2).await.unwrap(), 2);
        assert_eq!(store.sweep_sessions(now, 60, 300, 100).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn verification_codes_are_single_use() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        let expires = now + Duration::seconds(600);
        store
            .store_verification_code("a@test", CodePurpose::VerifyEmail, b"hash", expires, now)
            .await
            .unwrap();

        assert_eq!(
            store
                .consume_verification_code("a@test", CodePurpose::VerifyEmail, b"wrong", now)
                .await
                .unwrap(),
            CodeOutcome::Invalid
        );
        assert_eq!(
            store
                .consume_verification_code("a@test", CodePurpose::VerifyEmail, b"hash", now)
                .await
                .unwrap(),
            CodeOutcome::Consumed
        );
        assert_eq!(
            store
                .consume_verification_code("a@test", CodePurpose::VerifyEmail, b"hash", now)
                .await
                .unwrap(),
            CodeOutcome::AlreadyConsumed
        );
    }

    #[tokio::test]
    async fn new_code_supersedes_prior() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        let expires = now + Duration::seconds(600);
        store
            .store_verification_code("a@test", CodePurpose::ResetPassword, b"old", expires, now)
            .await
            .unwrap();
        store
            .store_verification_code("a@test", CodePurpose::ResetPassword, b"new", expires, now)
            .await
            .unwrap();

        assert_eq!(
            store
                .consume_verification_code("a@test", CodePurpose::ResetPassword, b"old", now)
                .await
                .unwrap(),
            CodeOutcome::Invalid
        );
        assert_eq!(
            store
                .consume_verification_code("a@test", CodePurpose::ResetPassword, b"new", now)
                .await
                .unwrap(),
            CodeOutcome::Consumed
        );
    }

    #[tokio::test]
    async fn expired_code_is_reported() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        store
            .store_verification_code(
                "a@test",
                CodePurpose::VerifyEmail,
                b"hash",
                now - Duration::seconds(1),
                now - Duration::seconds(601),
            )
            .await
            .unwrap();
        assert_eq!(
            store
                .consume_verification_code("a@test", CodePurpose::VerifyEmail, b"hash", now)
                .await
                .unwrap(),
            CodeOutcome::Expired
        );
    }

    #[tokio::test]
    async fn purposes_are_isolated() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        let expires = now + Duration::seconds(600);
        store
            .store_verification_code("a@test", CodePurpose::VerifyEmail, b"hash", expires, now)
            .await
            .unwrap();
        assert_eq!(
            store
                .consume_verification_code("a@test", CodePurpose::ResetPassword, b"hash", now)
                .await
                .unwrap(),
            CodeOutcome::Invalid
        );
    }

    #[tokio::test]
    async fn deactivate_all_counts_sessions() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        let expires = now + Duration::hours(1);
        store.insert_session(session(1, 7, b"a", expires), now).await.unwrap();
        store.insert_session(session(2, 7, b"b", expires), now).await.unwrap();
        store.insert_session(session(3, 8, b"c", expires), now).await.unwrap();

        assert_eq!(store.deactivate_all(Uuid::from_u128(7)).await.unwrap(), 2);
        assert_eq!(store.deactivate_all(Uuid::from_u128(7)).await.unwrap(), 0);
        assert_eq!(store.active_session_count().await, 1);
    }

    #[tokio::test]
    async fn list_sessions_orders_by_activity() {
        let store = MemoryAuthStore::new();
        let now = Utc::now();
        let expires = now + Duration::hours(1);
        store
            .insert_session(session(1, 7, b"a", expires), now - Duration::seconds(60))
            .await
            .unwrap();
        store.insert_session(session(2, 7, b"b", expires), now).await.unwrap();

        let sessions = store.list_sessions(Uuid::from_u128(7)).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, Uuid::from_u128(2));
    }
}
