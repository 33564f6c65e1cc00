//! Credential, session and verification flows.
//!
//! Handlers validate the transport (payloads, cookies, headers) and delegate
//! here; everything below speaks [`AuthStore`] and returns [`AuthError`]. The
//! current time is always passed in so the flows stay deterministic in tests.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::AuthError;
use super::password::{DUMMY_HASH, hash_password, verify_password};
use super::principal::Principal;
use super::state::AuthState;
use super::store::{Account, CodeOutcome, CodePurpose, FailureOutcome, NewSession, SessionRecord};
use super::token::{self, AccessClaims, TOKEN_VERSION};
use super::utils::{generate_refresh_token, generate_verification_code, hash_refresh_token,
    hash_verification_code};
use crate::api::email::EmailMessage;

/// Request metadata recorded on the session row.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A freshly minted token triple plus the principal it belongs to.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

pub(super) fn principal_of(account: &Account) -> Principal {
    Principal {
        account_id: account.id,
        email: account.email.clone(),
        role: account.role.clone(),
        capabilities: account.capabilities.clone(),
    }
}

/// Verify credentials and open a session.
///
/// Missing accounts, inactive accounts and wrong passwords are all reported
/// as `invalid_credentials`; the dummy verify keeps the missing-account path
/// as slow as the wrong-password path.
pub async fn sign_in(
    state: &AuthState,
    email: &str,
    password: &str,
    meta: ClientMeta,
    now: DateTime<Utc>,
) -> Result<IssuedSession, AuthError> {
    let store = state.store();
    let account = store
        .find_account_by_email(email)
        .await
        .map_err(AuthError::StorageUnavailable)?;

    let Some(account) = account else {
        let _ = verify_password(password, DUMMY_HASH);
        return Err(AuthError::InvalidCredentials {
            remaining_attempts: None,
        });
    };

    if !account.active {
        let _ = verify_password(password, DUMMY_HASH);
        return Err(AuthError::InvalidCredentials {
            remaining_attempts: None,
        });
    }

    if let Some(until) = account.lockout_until {
        if until > now {
            // Locked attempts are denied before any hash work and do not
            // consume an attempt.
            return Err(AuthError::AccountLocked {
                retry_in_seconds: (until - now).num_seconds().max(1),
            });
        }
        // The window has passed; the counter starts fresh.
        store
            .clear_lockout(account.id)
            .await
            .map_err(AuthError::StorageUnavailable)?;
    }

    let matches =
        verify_password(password, &account.password_hash).map_err(AuthError::Internal)?;

    if !matches {
        let outcome = store
            .record_sign_in_failure(
                account.id,
                state.config().lockout_threshold(),
                state.config().lockout_window_seconds(),
                now,
            )
            .await
            .map_err(AuthError::StorageUnavailable)?;
        return Err(match outcome {
            FailureOutcome::Counted { remaining } => AuthError::InvalidCredentials {
                remaining_attempts: Some(remaining),
            },
            FailureOutcome::LockedOut { until } => {
                warn!(account_id = %account.id, "account locked after repeated failures");
                AuthError::AccountLocked {
                    retry_in_seconds: (until - now).num_seconds().max(1),
                }
            }
        });
    }

    if !account.email_verified {
        return Err(AuthError::EmailVerificationRequired);
    }

    store
        .record_sign_in_success(account.id, now)
        .await
        .map_err(AuthError::StorageUnavailable)?;

    let issued = issue_session(state, &account, meta, now).await?;
    info!(account_id = %account.id, session_id = %issued.session_id, "sign-in succeeded");
    Ok(issued)
}

/// Open a new session row and mint the token triple for it.
pub async fn issue_session(
    state: &AuthState,
    account: &Account,
    meta: ClientMeta,
    now: DateTime<Utc>,
) -> Result<IssuedSession, AuthError> {
    let session_id = Uuid::new_v4();
    let refresh_token = generate_refresh_token().map_err(AuthError::Internal)?;
    let expires_at = now + Duration::seconds(state.config().refresh_ttl_seconds());

    state
        .store()
        .insert_session(
            NewSession {
                id: session_id,
                account_id: account.id,
                refresh_hash: hash_refresh_token(&refresh_token),
                ip: meta.ip,
                user_agent: meta.user_agent,
                expires_at,
            },
            now,
        )
        .await
        .map_err(AuthError::StorageUnavailable)?;

    mint_tokens(state, account, session_id, refresh_token, now)
}

fn mint_tokens(
    state: &AuthState,
    account: &Account,
    session_id: Uuid,
    refresh_token: String,
    now: DateTime<Utc>,
) -> Result<IssuedSession, AuthError> {
    let expires_in = state.config().access_ttl_seconds();
    let claims = AccessClaims {
        v: TOKEN_VERSION,
        sub: account.id,
        sid: session_id,
        role: account.role.clone(),
        iat: now.timestamp(),
        exp: now.timestamp() + expires_in,
    };
    let access_token = token::sign_hs256(state.config().signing_secret(), &claims)
        .map_err(|err| AuthError::Internal(anyhow!(err)))?;

    Ok(IssuedSession {
        access_token,
        refresh_token,
        session_id,
        expires_in,
        expires_at: now + Duration::seconds(expires_in),
        principal: principal_of(account),
    })
}

/// Verify an access token without touching storage.
pub fn verify_access(
    state: &AuthState,
    access_token: &str,
    now: DateTime<Utc>,
) -> Result<AccessClaims, AuthError> {
    token::verify_hs256(state.config().signing_secret(), access_token, now.timestamp()).map_err(
        |err| match err {
            token::Error::Expired => AuthError::TokenExpired,
            _ => AuthError::TokenMalformed,
        },
    )
}

/// Rotate the refresh token of a session and mint a fresh access token.
///
/// A fingerprint mismatch means the presented token was already rotated out,
/// which reads as theft: the session is revoked before the error returns.
/// Losing the storage-level compare-and-swap is reported the same way, so two
/// concurrent refreshes with the same prior token cannot both succeed.
pub async fn refresh(
    state: &AuthState,
    session_id: Uuid,
    refresh_token: &str,
    now: DateTime<Utc>,
) -> Result<IssuedSession, AuthError> {
    let store = state.store();
    let session = store
        .find_session(session_id)
        .await
        .map_err(AuthError::StorageUnavailable)?;

    let Some(session) = session else {
        return Err(AuthError::SessionNotFound);
    };
    if !session.active {
        return Err(AuthError::SessionNotFound);
    }
    if session.expires_at <= now {
        return Err(AuthError::SessionExpired);
    }

    let presented_hash = hash_refresh_token(refresh_token);
    if presented_hash != session.refresh_hash {
        warn!(session_id = %session_id, "refresh token reuse detected; revoking session");
        let _ = store.deactivate_session(session_id).await;
        return Err(AuthError::TokenReuseDetected);
    }

    let new_refresh_token = generate_refresh_token().map_err(AuthError::Internal)?;
    let new_expires_at = now + Duration::seconds(state.config().refresh_ttl_seconds());
    let rotated = store
        .rotate_session(
            session_id,
            &presented_hash,
            &hash_refresh_token(&new_refresh_token),
            new_expires_at,
            now,
        )
        .await
        .map_err(AuthError::StorageUnavailable)?;

    if !rotated {
        // The compare-and-swap can lose to a concurrent refresh, but also to
        // a logout or sweep that deactivated the row after the read above.
        // Only a changed fingerprint reads as theft.
        let current = store
            .find_session(session_id)
            .await
            .map_err(AuthError::StorageUnavailable)?;
        let err = lost_rotation_error(current.as_ref(), &presented_hash, now);
        if matches!(err, AuthError::TokenReuseDetected) {
            warn!(session_id = %session_id, "concurrent refresh lost compare-and-swap; revoking session");
            let _ = store.deactivate_session(session_id).await;
        }
        return Err(err);
    }

    let account = store
        .find_account_by_id(session.account_id)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    let Some(account) = account.filter(|account| account.active) else {
        let _ = store.deactivate_session(session_id).await;
        return Err(AuthError::SessionNotFound);
    };

    mint_tokens(state, &account, session_id, new_refresh_token, now)
}

/// Classify a rotation that lost the storage compare-and-swap.
///
/// A changed fingerprint means another request already rotated with the same
/// prior token; anything else means the row was deactivated or expired
/// between the read and the swap.
fn lost_rotation_error(
    current: Option<&SessionRecord>,
    presented_hash: &[u8],
    now: DateTime<Utc>,
) -> AuthError {
    match current {
        Some(session) if session.refresh_hash != presented_hash => AuthError::TokenReuseDetected,
        Some(session) if !session.active => AuthError::SessionNotFound,
        Some(session) if session.expires_at <= now => AuthError::SessionExpired,
        _ => AuthError::SessionNotFound,
    }
}

/// Issue a verification code for the address.
///
/// Always reports the code TTL, whether or not an account exists; the
/// response never confirms an address. A new code supersedes any unconsumed
/// prior code for the same (email, purpose) pair.
pub async fn request_code(
    state: &AuthState,
    email: &str,
    purpose: CodePurpose,
    now: DateTime<Utc>,
) -> Result<i64, AuthError> {
    let expires_in = state.config().code_ttl_seconds();

    let account = state
        .store()
        .find_account_by_email(email)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    if account.is_none() {
        // Opaque no-op; nothing is stored or sent.
        return Ok(expires_in);
    }

    let code = generate_verification_code();
    state
        .store()
        .store_verification_code(
            email,
            purpose,
            &hash_verification_code(&code),
            now + Duration::seconds(expires_in),
            now,
        )
        .await
        .map_err(AuthError::StorageUnavailable)?;

    let message = EmailMessage {
        to_email: email.to_string(),
        template: purpose.as_str().to_string(),
        payload_json: json!({ "code": code, "expires_in": expires_in }).to_string(),
    };
    if let Err(err) = state.email().send(&message) {
        // Delivery failures stay opaque to the caller as well.
        warn!(purpose = purpose.as_str(), "failed to send verification email: {err:#}");
    }

    Ok(expires_in)
}

/// Consume a code or explain why it cannot be consumed.
pub async fn consume_code(
    state: &AuthState,
    email: &str,
    code: &str,
    purpose: CodePurpose,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    let outcome = state
        .store()
        .consume_verification_code(email, purpose, &hash_verification_code(code), now)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    match outcome {
        CodeOutcome::Consumed => Ok(()),
        CodeOutcome::Invalid => Err(AuthError::VerificationCodeInvalid),
        CodeOutcome::Expired => Err(AuthError::VerificationCodeExpired),
        CodeOutcome::AlreadyConsumed => Err(AuthError::VerificationCodeAlreadyConsumed),
    }
}

/// Verify-email flow: consume the code and flip the account flag.
pub async fn verify_email(
    state: &AuthState,
    email: &str,
    code: &str,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    consume_code(state, email, code, CodePurpose::VerifyEmail, now).await?;
    state
        .store()
        .mark_email_verified(email)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    info!("email verified");
    Ok(())
}

/// Reset-password flow: consume the code, store the new hash, revoke every
/// session and open a fresh one.
pub async fn reset_password(
    state: &AuthState,
    email: &str,
    code: &str,
    new_password: &str,
    meta: ClientMeta,
    now: DateTime<Utc>,
) -> Result<IssuedSession, AuthError> {
    consume_code(state, email, code, CodePurpose::ResetPassword, now).await?;

    let store = state.store();
    let account = store
        .find_account_by_email(email)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    let Some(account) = account.filter(|account| account.active) else {
        return Err(AuthError::VerificationCodeInvalid);
    };

    let password_hash = hash_password(new_password).map_err(AuthError::Internal)?;
    store
        .update_password(account.id, &password_hash, now)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    let revoked = store
        .deactivate_all(account.id)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    store
        .clear_lockout(account.id)
        .await
        .map_err(AuthError::StorageUnavailable)?;
    info!(account_id = %account.id, revoked, "password reset; prior sessions revoked");

    issue_session(state, &account, meta, now).await
}
