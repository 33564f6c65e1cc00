//! Email delivery abstraction for verification codes.
//!
//! Handlers never block on delivery details; they build an [`EmailMessage`]
//! and hand it to the configured [`EmailSender`]. The default sender for
//! local dev is [`LogEmailSender`], which logs and returns `Ok(())`.

use anyhow::Result;
use tracing::info;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to mark it as failed.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sender_always_succeeds() {
        let sender = LogEmailSender;
        let message = EmailMessage {
            to_email: "a@test".to_string(),
            template: "verification-code".to_string(),
            payload_json: r#"{"code":"123456"}"#.to_string(),
        };
        assert!(sender.send(&message).is_ok());
    }
}
