//! End-to-end flows over the in-memory store: sign-in and lockout, refresh
//! rotation with reuse detection, verification codes, and the sweeper.

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHasher};
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use custodia::api::email::{EmailMessage, EmailSender};
use custodia::api::handlers::auth::store::{Account, AuthStore, CodePurpose, MemoryAuthStore};
use custodia::api::handlers::auth::{AuthConfig, AuthError, AuthState, service};
use custodia::api::sweeper::SessionSweeper;

const SECRET: &str = "an-integration-test-secret-of-32+b";

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingSender {
    fn last_code(&self) -> Option<String> {
        let sent = self.sent.lock().ok()?;
        let message = sent.last()?;
        let payload: serde_json::Value = serde_json::from_str(&message.payload_json).ok()?;
        payload
            .get("code")
            .and_then(|code| code.as_str())
            .map(ToString::to_string)
    }
}

impl EmailSender for RecordingSender {
    fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

fn hash(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

fn account(email: &str, password: &str) -> Account {
    Account {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: hash(password),
        role: "employee".to_string(),
        capabilities: custodia::api::handlers::auth::CapabilitySet::default(),
        active: true,
        email_verified: true,
        failed_logins: 0,
        lockout_until: None,
        last_login_at: None,
        password_changed_at: None,
    }
}

struct Harness {
    state: AuthState,
    store: Arc<MemoryAuthStore>,
    sender: Arc<RecordingSender>,
}

fn harness(config: AuthConfig) -> Harness {
    let store = Arc::new(MemoryAuthStore::new());
    let sender = Arc::new(RecordingSender::default());
    let state = AuthState::new(
        config,
        Arc::clone(&store) as Arc<dyn AuthStore>,
        Arc::clone(&sender) as Arc<dyn EmailSender>,
    );
    Harness {
        state,
        store,
        sender,
    }
}

fn config() -> AuthConfig {
    AuthConfig::new(SECRET.into()).unwrap()
}

#[tokio::test]
async fn sign_in_refresh_and_reuse_detection() {
    let h = harness(config());
    h.store.insert_account(account("ana@test", "s3cret-enough")).await;
    let now = Utc::now();

    let issued = service::sign_in(
        &h.state,
        "ana@test",
        "s3cret-enough",
        service::ClientMeta::default(),
        now,
    )
    .await
    .unwrap();

    // The access token verifies offline and carries the session id.
    let claims = service::verify_access(&h.state, &issued.access_token, now).unwrap();
    assert_eq!(claims.sid, issued.session_id);

    // Rotation keeps the session id but replaces the refresh token.
    let rotated = service::refresh(&h.state, issued.session_id, &issued.refresh_token, now)
        .await
        .unwrap();
    assert_eq!(rotated.session_id, issued.session_id);
    assert_ne!(rotated.refresh_token, issued.refresh_token);

    // Replaying the rotated-out token revokes the whole session.
    let replay = service::refresh(&h.state, issued.session_id, &issued.refresh_token, now).await;
    assert!(matches!(replay, Err(AuthError::TokenReuseDetected)));

    // The current token is dead too: the session no longer exists.
    let after = service::refresh(&h.state, issued.session_id, &rotated.refresh_token, now).await;
    assert!(matches!(after, Err(AuthError::SessionNotFound)));
}

#[tokio::test]
async fn lockout_engages_and_expires_with_the_window() {
    let config = config()
        .with_lockout_threshold(2)
        .with_lockout_window_seconds(60);
    let h = harness(config);
    h.store.insert_account(account("leo@test", "right-password")).await;
    let now = Utc::now();

    let first = service::sign_in(
        &h.state,
        "leo@test",
        "wrong",
        service::ClientMeta::default(),
        now,
    )
    .await;
    assert!(matches!(
        first,
        Err(AuthError::InvalidCredentials {
            remaining_attempts: Some(1)
        })
    ));

    let second = service::sign_in(
        &h.state,
        "leo@test",
        "wrong",
        service::ClientMeta::default(),
        now,
    )
    .await;
    assert!(matches!(second, Err(AuthError::AccountLocked { .. })));

    // Correct password while locked is still denied.
    let locked = service::sign_in(
        &h.state,
        "leo@test",
        "right-password",
        service::ClientMeta::default(),
        now,
    )
    .await;
    assert!(matches!(locked, Err(AuthError::AccountLocked { .. })));

    // Once the window has elapsed the counter resets and sign-in succeeds.
    let later = now + Duration::seconds(61);
    let unlocked = service::sign_in(
        &h.state,
        "leo@test",
        "right-password",
        service::ClientMeta::default(),
        later,
    )
    .await;
    assert!(unlocked.is_ok());
}

#[tokio::test]
async fn verification_code_is_single_use() {
    let h = harness(config());
    let mut unverified = account("mia@test", "pw-long-enough");
    unverified.email_verified = false;
    h.store.insert_account(unverified).await;
    let now = Utc::now();

    // Unverified accounts cannot open sessions.
    let denied = service::sign_in(
        &h.state,
        "mia@test",
        "pw-long-enough",
        service::ClientMeta::default(),
        now,
    )
    .await;
    assert!(matches!(denied, Err(AuthError::EmailVerificationRequired)));

    service::request_code(&h.state, "mia@test", CodePurpose::VerifyEmail, now)
        .await
        .unwrap();
    let code = h.sender.last_code().unwrap();

    service::verify_email(&h.state, "mia@test", &code, now)
        .await
        .unwrap();

    // Second redemption of the same code is rejected.
    let again = service::verify_email(&h.state, "mia@test", &code, now).await;
    assert!(matches!(
        again,
        Err(AuthError::VerificationCodeAlreadyConsumed)
    ));

    // And the account can now sign in.
    let issued = service::sign_in(
        &h.state,
        "mia@test",
        "pw-long-enough",
        service::ClientMeta::default(),
        now,
    )
    .await;
    assert!(issued.is_ok());
}

#[tokio::test]
async fn unknown_email_request_is_opaque() {
    let h = harness(config());
    let now = Utc::now();

    let expires_in = service::request_code(&h.state, "ghost@test", CodePurpose::VerifyEmail, now)
        .await
        .unwrap();
    assert_eq!(expires_in, h.state.config().code_ttl_seconds());
    assert!(h.sender.last_code().is_none());
}

#[tokio::test]
async fn reset_password_revokes_other_sessions() {
    let h = harness(config());
    h.store.insert_account(account("rui@test", "old-password-12")).await;
    let now = Utc::now();

    let issued = service::sign_in(
        &h.state,
        "rui@test",
        "old-password-12",
        service::ClientMeta::default(),
        now,
    )
    .await
    .unwrap();
    assert_eq!(h.store.active_session_count().await, 1);

    service::request_code(&h.state, "rui@test", CodePurpose::ResetPassword, now)
        .await
        .unwrap();
    let code = h.sender.last_code().unwrap();

    let fresh = service::reset_password(
        &h.state,
        "rui@test",
        &code,
        "new-password-12",
        service::ClientMeta::default(),
        now,
    )
    .await
    .unwrap();

    // Only the session issued by the reset survives.
    assert_eq!(h.store.active_session_count().await, 1);
    let old = service::refresh(&h.state, issued.session_id, &issued.refresh_token, now).await;
    assert!(matches!(old, Err(AuthError::SessionNotFound)));

    // Old password is gone, new one works.
    let stale = service::sign_in(
        &h.state,
        "rui@test",
        "old-password-12",
        service::ClientMeta::default(),
        now,
    )
    .await;
    assert!(matches!(stale, Err(AuthError::InvalidCredentials { .. })));

    let rotated = service::refresh(&h.state, fresh.session_id, &fresh.refresh_token, now).await;
    assert!(rotated.is_ok());
}

#[tokio::test]
async fn sweeper_removes_expired_sessions() {
    // A negative TTL issues sessions that are already expired.
    let config = config()
        .with_refresh_ttl_seconds(-5)
        .with_sweep_grace_seconds(0);
    let h = harness(config);
    h.store.insert_account(account("zoe@test", "pw-long-enough")).await;
    let now = Utc::now();

    service::sign_in(
        &h.state,
        "zoe@test",
        "pw-long-enough",
        service::ClientMeta::default(),
        now,
    )
    .await
    .unwrap();
    assert_eq!(h.store.active_session_count().await, 1);

    let sweeper = SessionSweeper::new(Arc::clone(&h.store) as Arc<dyn AuthStore>, h.state.config());
    assert_eq!(sweeper.run_once().await.unwrap(), 1);
    assert_eq!(h.store.active_session_count().await, 0);
}
