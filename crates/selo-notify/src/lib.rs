//! Notification abstraction for selo.
//!
//! This crate defines the `Notifier` trait the signing core emits through and
//! the types representing outbound messages. Transports (email, WhatsApp)
//! live behind implementations; the core only ever sees this trait, and every
//! send happens after the state transition it announces has committed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use selo_storage::AuthChannel;

/// An outbound message. The invite variant is the only place the cleartext
/// share token exists outside the signer's browser; it must never be logged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// Signing invitation with the one-per-signer access link.
    SignerInvited {
        channel: AuthChannel,
        recipient: String,
        signer_name: String,
        document_title: String,
        signing_url: String,
        message: Option<String>,
    },
    /// One-time code delivery.
    OtpCode {
        channel: AuthChannel,
        recipient: String,
        code: String,
    },
    /// Document fully signed; sent to owner and signers.
    DocumentCompleted {
        recipient: String,
        document_title: String,
        short_code: Option<String>,
    },
    /// Deadline approaching; sent to signers that have not signed yet.
    DeadlineReminder {
        recipient: String,
        document_title: String,
        deadline: String,
    },
}

impl Notification {
    /// Recipient address, for logs and failure audits (masked upstream).
    pub fn recipient(&self) -> &str {
        match self {
            Notification::SignerInvited { recipient, .. }
            | Notification::OtpCode { recipient, .. }
            | Notification::DocumentCompleted { recipient, .. }
            | Notification::DeadlineReminder { recipient, .. } => recipient,
        }
    }

    /// Short kind tag for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::SignerInvited { .. } => "signer_invited",
            Notification::OtpCode { .. } => "otp_code",
            Notification::DocumentCompleted { .. } => "document_completed",
            Notification::DeadlineReminder { .. } => "deadline_reminder",
        }
    }
}

/// Error type for notification dispatch
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// Trait for notification transports.
///
/// Dispatch is best-effort by contract: callers run it after commit and
/// record failures as audit entries instead of rolling anything back.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}
