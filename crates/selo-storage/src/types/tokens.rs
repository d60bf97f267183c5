//! Share token types.

use chrono::{DateTime, Utc};

use super::{DocumentId, ShareTokenId, SignerId};

/// One-per-signer bearer token granting access to the signer-facing
/// operations of a single document. Only the SHA-256 of the cleartext is
/// persisted; the cleartext travels once, to the notifier.
#[derive(Clone, Debug)]
pub struct ShareToken {
    pub id: ShareTokenId,
    pub document_id: DocumentId,
    pub signer_id: SignerId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the signer commits. Recorded for evidence; does not gate
    /// resolution (a signed signer's repeat calls must read as terminal,
    /// not as an invalid token).
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for minting a share token row
#[derive(Clone, Debug)]
pub struct CreateShareTokenParams {
    pub document_id: DocumentId,
    pub signer_id: SignerId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}
