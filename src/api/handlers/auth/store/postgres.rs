//! Postgres [`AuthStore`] backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::super::principal::CapabilitySet;
use super::{
    Account, AuthStore, CodeOutcome, CodePurpose, FailureOutcome, NewSession, SessionRecord,
};

pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, role, capabilities::text AS capabilities, \
     active, email_verified, failed_logins, lockout_until, last_login_at, password_changed_at";

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<Account> {
    let capabilities: Option<String> = row.get("capabilities");
    let capabilities = CapabilitySet::from_json(capabilities.as_deref())
        .context("failed to parse capabilities column")?;
    Ok(Account {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        capabilities,
        active: row.get("active"),
        email_verified: row.get("email_verified"),
        failed_logins: row.get("failed_logins"),
        lockout_until: row.get("lockout_until"),
        last_login_at: row.get("last_login_at"),
        password_changed_at: row.get("password_changed_at"),
    })
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        refresh_hash: row.get("refresh_hash"),
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
        active: row.get("active"),
        expires_at: row.get("expires_at"),
        last_activity_at: row.get("last_activity_at"),
        created_at: row.get("created_at"),
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup account by email")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_id(&self, account_id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup account by id")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn record_sign_in_failure(
        &self,
        account_id: Uuid,
        threshold: u32,
        lockout_window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let threshold_i32 = i32::try_from(threshold).unwrap_or(i32::MAX);
        let lockout_at = now + Duration::seconds(lockout_window_seconds);
        // Increment and lockout decision happen in one statement so
        // concurrent failures each count exactly once.
        let query = r"
            UPDATE accounts
            SET failed_logins = failed_logins + 1,
                lockout_until = CASE
                    WHEN failed_logins + 1 >= $2 THEN $3
                    ELSE lockout_until
                END,
                updated_at = $4
            WHERE id = $1
            RETURNING failed_logins, lockout_until
        ";
        let row = sqlx::query(query)
            .bind(account_id)
            .bind(threshold_i32)
            .bind(lockout_at)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to record sign-in failure")?;

        let failures: i32 = row.get("failed_logins");
        if failures >= threshold_i32 {
            let until: Option<DateTime<Utc>> = row.get("lockout_until");
            Ok(FailureOutcome::LockedOut {
                until: until.unwrap_or(lockout_at),
            })
        } else {
            let remaining = threshold.saturating_sub(u32::try_from(failures).unwrap_or(0));
            Ok(FailureOutcome::Counted { remaining })
        }
    }

    async fn clear_lockout(&self, account_id: Uuid) -> Result<()> {
        let query = "UPDATE accounts SET failed_logins = 0, lockout_until = NULL WHERE id = $1";
        sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to clear lockout")?;
        Ok(())
    }

    async fn record_sign_in_success(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET failed_logins = 0, lockout_until = NULL, last_login_at = $2, updated_at = $2
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(account_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to record sign-in success")?;
        Ok(())
    }

    async fn insert_session(&self, session: NewSession, now: DateTime<Utc>) -> Result<()> {
        let query = r"
            INSERT INTO sessions
                (id, account_id, refresh_hash, ip, user_agent, active, expires_at,
                 last_activity_at, created_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $7)
        ";
        sqlx::query(query)
            .bind(session.id)
            .bind(session.account_id)
            .bind(&session.refresh_hash)
            .bind(&session.ip)
            .bind(&session.user_agent)
            .bind(session.expires_at)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT id, account_id, refresh_hash, ip, user_agent, active, expires_at,
                   last_activity_at, created_at
            FROM sessions WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        current_hash: &[u8],
        new_hash: &[u8],
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Compare-and-swap on the fingerprint; a concurrent rotation with the
        // same prior token loses and gets zero rows back.
        let query = r"
            UPDATE sessions
            SET refresh_hash = $3, expires_at = $4, last_activity_at = $5
            WHERE id = $1 AND refresh_hash = $2 AND active
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(session_id)
            .bind(current_hash)
            .bind(new_hash)
            .bind(new_expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to rotate session")?;
        Ok(row.is_some())
    }

    async fn touch_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE sessions SET last_activity_at = $2 WHERE id = $1 AND active";
        sqlx::query(query)
            .bind(session_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to touch session")?;
        Ok(())
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<bool> {
        let query = "UPDATE sessions SET active = FALSE WHERE id = $1 AND active RETURNING id";
        let row = sqlx::query(query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to deactivate session")?;
        Ok(row.is_some())
    }

    async fn deactivate_all(&self, account_id: Uuid) -> Result<u64> {
        let query = "UPDATE sessions SET active = FALSE WHERE account_id = $1 AND active";
        let result = sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to deactivate sessions")?;
        Ok(result.rows_affected())
    }

    async fn list_sessions(&self, account_id: Uuid) -> Result<Vec<SessionRecord>> {
        let query = r"
            SELECT id, account_id, refresh_hash, ip, user_agent, active, expires_at,
                   last_activity_at, created_at
            FROM sessions
            WHERE account_id = $1 AND active
            ORDER BY last_activity_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list sessions")?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn sweep_sessions(
        &self,
        now: DateTime<Utc>,
        grace_seconds: i64,
        idle_timeout_seconds: i64,
        limit: i64,
    ) -> Result<u64> {
        let expiry_cutoff = now - Duration::seconds(grace_seconds);
        let idle_cutoff = now - Duration::seconds(idle_timeout_seconds);
        let query = r"
            UPDATE sessions SET active = FALSE
            WHERE id IN (
                SELECT id FROM sessions
                WHERE active AND (expires_at <= $1 OR last_activity_at <= $2)
                LIMIT $3
            )
        ";
        let result = sqlx::query(query)
            .bind(expiry_cutoff)
            .bind(idle_cutoff)
            .bind(limit)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to sweep sessions")?;
        Ok(result.rows_affected())
    }

    async fn store_verification_code(
        &self,
        email: &str,
        purpose: CodePurpose,
        code_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Supersede-and-insert in one transaction: only the latest code for
        // the pair is ever consumable.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin verification-code transaction")?;

        let query = "DELETE FROM verification_codes WHERE email = $1 AND purpose = $2";
        sqlx::query(query)
            .bind(email)
            .bind(purpose.as_str())
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to supersede verification codes")?;

        let query = r"
            INSERT INTO verification_codes (email, purpose, code_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(email)
            .bind(purpose.as_str())
            .bind(code_hash)
            .bind(expires_at)
            .bind(now)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert verification code")?;

        tx.commit()
            .await
            .context("commit verification-code transaction")?;
        Ok(())
    }

    async fn consume_verification_code(
        &self,
        email: &str,
        purpose: CodePurpose,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<CodeOutcome> {
        // Atomic consume; of two concurrent submissions only one sees a row.
        let query = r"
            UPDATE verification_codes SET consumed = TRUE
            WHERE email = $1 AND purpose = $2 AND code_hash = $3
              AND NOT consumed AND expires_at > $4
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(purpose.as_str())
            .bind(code_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume verification code")?;
        if row.is_some() {
            return Ok(CodeOutcome::Consumed);
        }

        // Classify the failure for the client.
        let query = r"
            SELECT consumed, expires_at FROM verification_codes
            WHERE email = $1 AND purpose = $2 AND code_hash = $3
            ORDER BY created_at DESC
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(purpose.as_str())
            .bind(code_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to classify verification code")?;

        Ok(match row {
            None => CodeOutcome::Invalid,
            Some(row) if row.get::<bool, _>("consumed") => CodeOutcome::AlreadyConsumed,
            Some(row) if row.get::<DateTime<Utc>, _>("expires_at") <= now => CodeOutcome::Expired,
            // Lost a race with another consumer that has since superseded.
            Some(_) => CodeOutcome::Invalid,
        })
    }

    async fn mark_email_verified(&self, email: &str) -> Result<bool> {
        let query =
            "UPDATE accounts SET email_verified = TRUE WHERE email = $1 RETURNING id";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to mark email verified")?;
        Ok(row.is_some())
    }

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET password_hash = $2, password_changed_at = $3, updated_at = $3
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(account_id)
            .bind(password_hash)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("database ping failed")?;
        Ok(())
    }
}
