//! The Store trait that backends implement.

use chrono::{DateTime, Utc};
use selo_audit::{AuditDraft, AuditEvent};
use uuid::Uuid;

use crate::types::*;
use crate::StoreError;

/// The storage trait the service layer depends on.
///
/// Every method that couples a state change with an audit entry runs both
/// inside one backend transaction: the audit chain link is read, extended and
/// written under the same isolation as the row it describes, so concurrent
/// appends on one entity can never fork the chain. There is deliberately no
/// update or delete surface for audit rows.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ───────────────────────────── Tenants & users ─────────────────────────────

    /// Create a tenant.
    async fn create_tenant(&self, name: &str) -> Result<Tenant, StoreError>;

    /// Create a user (email is globally unique).
    async fn create_user(&self, params: &CreateUserParams) -> Result<User, StoreError>;

    /// Get user by ID.
    async fn get_user(&self, user_id: &UserId) -> Result<User, StoreError>;

    /// Get user by email.
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Create a bearer session for a user; only the token hash is stored.
    async fn create_session(
        &self,
        user_id: &UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    /// Resolve an unexpired session by bearer-token hash.
    async fn get_session_by_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    // ───────────────────────────── Documents ─────────────────────────────

    /// Insert a document row (blob already stored) together with its
    /// `STORAGE_UPLOADED` audit entry.
    async fn create_document(
        &self,
        params: &CreateDocumentParams,
        audit: AuditDraft,
    ) -> Result<Document, StoreError>;

    /// Get document by ID.
    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, StoreError>;

    /// Find the document whose stored content hash matches.
    async fn find_document_by_sha256(&self, sha256: &str) -> Result<Document, StoreError>;

    /// Transition a non-terminal document and append `STATUS_CHANGED`.
    /// Fails with [`StoreError::Terminal`] when the document is already
    /// signed, cancelled or expired.
    async fn update_document_status(
        &self,
        document_id: &DocumentId,
        new_status: DocumentStatus,
        audit: AuditDraft,
    ) -> Result<Document, StoreError>;

    /// Non-terminal documents whose deadline falls before the cutoff
    /// (deadline sweep input).
    async fn list_deadline_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError>;

    // ───────────────────────────── Signers ─────────────────────────────

    /// Insert a signer, its share token row and the `INVITED` audit entry in
    /// one transaction.
    async fn create_signer(
        &self,
        params: &CreateSignerParams,
        token: &CreateShareTokenParams,
        audit: AuditDraft,
    ) -> Result<Signer, StoreError>;

    /// Get signer by ID.
    async fn get_signer(&self, signer_id: &SignerId) -> Result<Signer, StoreError>;

    /// All signers of a document, in invite order.
    async fn list_signers(&self, document_id: &DocumentId) -> Result<Vec<Signer>, StoreError>;

    /// Resolve a share token hash to its token row, signer and document.
    async fn resolve_share_token(
        &self,
        token_hash: &str,
    ) -> Result<(ShareToken, Signer, Document), StoreError>;

    /// First summary fetch flips pending → viewed and appends `VIEWED`;
    /// later fetches return the row unchanged.
    async fn record_signer_view(
        &self,
        signer_id: &SignerId,
        audit: AuditDraft,
    ) -> Result<Signer, StoreError>;

    /// Update the signer's self-reported identity fields.
    async fn update_signer_identity(
        &self,
        signer_id: &SignerId,
        cpf: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Signer, StoreError>;

    /// Persist where the signature stamp should land.
    async fn set_signer_position(
        &self,
        signer_id: &SignerId,
        position: SignaturePosition,
    ) -> Result<Signer, StoreError>;

    /// Pending or viewed signer declines; appends `DECLINED`.
    async fn decline_signer(
        &self,
        signer_id: &SignerId,
        audit: AuditDraft,
    ) -> Result<Signer, StoreError>;

    /// The commit transaction: flip the signer to signed, consume its share
    /// token, append `SIGNED`, re-read the document's signers and report
    /// whether this commit was the one that completed the set. When unsigned
    /// signers remain the document moves to partially-signed (appending
    /// `status_audit` on the first such transition).
    ///
    /// A signed signer fails with [`StoreError::Terminal`] and leaves the
    /// chain untouched; so does a terminal document.
    async fn commit_signature(
        &self,
        params: &CommitSignatureParams,
        signed_audit: AuditDraft,
        status_audit: AuditDraft,
    ) -> Result<CommitOutcome, StoreError>;

    /// Flip a fully-signed document to signed, pointing it at the stamped
    /// blob, appending `PADES_SIGNED` + `CERTIFICATE_ISSUED` and inserting
    /// the unique certificate row, all in one transaction. Idempotent: an
    /// already-signed document returns its existing certificate unchanged.
    async fn finalize_document(
        &self,
        document_id: &DocumentId,
        storage_key: &str,
        sha256: &str,
        pades_audit: AuditDraft,
        certificate_audit: AuditDraft,
    ) -> Result<(Document, Certificate), StoreError>;

    /// Get the completion certificate of a document.
    async fn get_certificate(&self, document_id: &DocumentId) -> Result<Certificate, StoreError>;

    // ───────────────────────────── One-time codes ─────────────────────────────

    /// Persist a delivered code.
    async fn create_otp_code(&self, params: &CreateOtpCodeParams) -> Result<OtpCode, StoreError>;

    /// Most recent code for any of the given recipients in a context,
    /// regardless of channel.
    async fn latest_otp_code(
        &self,
        recipients: &[String],
        context: &str,
    ) -> Result<OtpCode, StoreError>;

    /// Destroy a code (after successful verification or expiry).
    async fn delete_otp_code(&self, id: &OtpCodeId) -> Result<(), StoreError>;

    // ───────────────────────────── Audit ─────────────────────────────

    /// Append an audit entry outside any other state change (OTP sends and
    /// verifications, notification failures).
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditEvent, StoreError>;

    /// Full chain for one entity, ascending by write time.
    async fn list_chain(&self, entity_id: &Uuid) -> Result<Vec<AuditEvent>, StoreError>;
}
