//! Completion certificate types.

use chrono::{DateTime, Utc};

use super::DocumentId;

/// Completion certificate, written exactly once per document at the signed
/// transition. References the finalized blob and its hash.
#[derive(Clone, Debug)]
pub struct Certificate {
    pub document_id: DocumentId,
    pub storage_key: String,
    pub sha256: String,
    pub issued_at: DateTime<Utc>,
}
