//! Signer types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentId, SignerId};

/// Delivery channel a signer can authenticate over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthChannel {
    Email,
    Whatsapp,
}

impl std::fmt::Display for AuthChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthChannel::Email => "email",
            AuthChannel::Whatsapp => "whatsapp",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AuthChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(AuthChannel::Email),
            "whatsapp" => Ok(AuthChannel::Whatsapp),
            _ => Err(format!("Unknown auth channel: {}", s)),
        }
    }
}

/// Signer workflow status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Pending,
    Viewed,
    Signed,
    Declined,
}

impl SignerStatus {
    /// Signed and declined signers accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignerStatus::Signed | SignerStatus::Declined)
    }
}

impl std::fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignerStatus::Pending => "pending",
            SignerStatus::Viewed => "viewed",
            SignerStatus::Signed => "signed",
            SignerStatus::Declined => "declined",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SignerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SignerStatus::Pending),
            "viewed" => Ok(SignerStatus::Viewed),
            "signed" => Ok(SignerStatus::Signed),
            "declined" => Ok(SignerStatus::Declined),
            _ => Err(format!("Unknown signer status: {}", s)),
        }
    }
}

/// Where a signature stamp lands on the document (1-indexed page, PDF
/// coordinates with origin at bottom-left).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignaturePosition {
    pub page: u32,
    pub x: f32,
    pub y: f32,
}

/// Signer record. Once `Signed`, the signature fields are immutable.
#[derive(Clone, Debug)]
pub struct Signer {
    pub id: SignerId,
    pub document_id: DocumentId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub qualification: Option<String>,
    /// Non-empty subset of delivery channels for OTP codes.
    pub auth_channels: Vec<AuthChannel>,
    pub order_index: i32,
    pub status: SignerStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub signature_hash: Option<String>,
    pub signature_artefact_path: Option<String>,
    pub position: Option<SignaturePosition>,
    pub created_at: DateTime<Utc>,
}

impl Signer {
    /// All contacts a one-time code could have been delivered to.
    pub fn contacts(&self) -> Vec<String> {
        let mut contacts = vec![self.email.clone()];
        if let Some(phone) = &self.phone {
            contacts.push(phone.clone());
        }
        contacts
    }
}

/// Parameters for creating a signer
#[derive(Clone, Debug)]
pub struct CreateSignerParams {
    pub id: SignerId,
    pub document_id: DocumentId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub qualification: Option<String>,
    pub auth_channels: Vec<AuthChannel>,
    pub order_index: i32,
}

/// Fields written when a signer commits their signature
#[derive(Clone, Debug)]
pub struct CommitSignatureParams {
    pub signer_id: SignerId,
    pub signed_at: DateTime<Utc>,
    pub signature_hash: String,
    pub signature_artefact_path: String,
}

/// What a `commit_signature` transaction observed.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    pub signer: Signer,
    pub document_status: super::DocumentStatus,
    /// True for exactly one committing transaction per document: the one
    /// that flipped the last pending signer.
    pub all_signed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        for channel in [AuthChannel::Email, AuthChannel::Whatsapp] {
            let parsed: AuthChannel = channel.to_string().parse().unwrap();
            assert_eq!(channel, parsed);
        }
        assert!("sms".parse::<AuthChannel>().is_err());
    }

    #[test]
    fn test_signer_status_roundtrip() {
        for status in [
            SignerStatus::Pending,
            SignerStatus::Viewed,
            SignerStatus::Signed,
            SignerStatus::Declined,
        ] {
            let parsed: SignerStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_terminal_signer_statuses() {
        assert!(SignerStatus::Signed.is_terminal());
        assert!(SignerStatus::Declined.is_terminal());
        assert!(!SignerStatus::Pending.is_terminal());
        assert!(!SignerStatus::Viewed.is_terminal());
    }
}
