//! Document types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentId, TenantId, UserId};

/// Document lifecycle status.
///
/// `Signed`, `Cancelled` and `Expired` are terminal: no transition leaves
/// them and their rows are immutable from then on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Ready,
    PartiallySigned,
    Signed,
    Cancelled,
    Expired,
}

impl DocumentStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Signed | DocumentStatus::Cancelled | DocumentStatus::Expired
        )
    }

    /// Whether signers may still act on the document.
    pub fn is_signable(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::PartiallySigned)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Ready => "ready",
            DocumentStatus::PartiallySigned => "partially_signed",
            DocumentStatus::Signed => "signed",
            DocumentStatus::Cancelled => "cancelled",
            DocumentStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "ready" => Ok(DocumentStatus::Ready),
            "partially_signed" => Ok(DocumentStatus::PartiallySigned),
            "signed" => Ok(DocumentStatus::Signed),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            "expired" => Ok(DocumentStatus::Expired),
            _ => Err(format!("Unknown document status: {}", s)),
        }
    }
}

/// Document record.
///
/// `sha256` always equals the SHA-256 of the bytes at `storage_key`;
/// finalization rewrites both together.
#[derive(Clone, Debug)]
pub struct Document {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub owner_id: UserId,
    pub title: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub sha256: String,
    pub status: DocumentStatus,
    pub deadline_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a document after its blob has been stored
#[derive(Clone, Debug)]
pub struct CreateDocumentParams {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub owner_id: UserId,
    pub title: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub sha256: String,
    pub deadline_at: Option<DateTime<Utc>>,
}
