//! Server state, error mapping and request extractors.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

use selo_audit::{ActorKind, AuditAction, AuditDraft, EntityType};
use selo_blob::{signed_variant_key, BlobError, BlobStore};
use selo_crypto::{mask_email, mask_phone, sha256_hex, share_token_hash, Clock, Entropy};
use selo_notify::{Notification, Notifier};
use selo_pdf::{PdfError, SignatureStamp, StampPlacement};
use selo_storage::{
    Certificate, Document, DocumentId, DocumentStatus, Signer, SignerStatus, Store, StoreError,
    User,
};

use crate::config::ServerConfig;

/// Shared server state: storage, blob store, notifier and the injected
/// clock/entropy capabilities. Cheap to clone, handed to every handler.
#[derive(Clone)]
pub struct SeloServer {
    pub store: Arc<dyn Store>,
    pub blob: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub entropy: Arc<dyn Entropy>,
    pub config: ServerConfig,
}

/// API error kinds; the `IntoResponse` impl fixes the HTTP mapping.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("verification code expired")]
    OtpExpired,
    #[error("invalid verification code")]
    OtpWrong,
    #[error("already in a terminal state")]
    AlreadyTerminal,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::OtpExpired | ApiError::OtpWrong | ApiError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::AlreadyTerminal | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Integrity(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Server-side detail stays server-side; clients get a flat message.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Terminal => ApiError::AlreadyTerminal,
            StoreError::AlreadyExists => ApiError::Validation("already exists".into()),
            StoreError::Conflict => ApiError::Conflict("conflicting state".into()),
            StoreError::Backend(message) => ApiError::Internal(message),
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(key) => ApiError::Integrity(format!("missing blob {}", key)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PdfError> for ApiError {
    fn from(err: PdfError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<selo_crypto::CodeHashError> for ApiError {
    fn from(err: selo_crypto::CodeHashError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Authenticated user, resolved from the bearer session token.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<SeloServer>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<SeloServer>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::InvalidToken)?;
        let token = header.strip_prefix("Bearer ").ok_or(ApiError::InvalidToken)?;

        let session = state
            .store
            .get_session_by_token_hash(&share_token_hash(token), state.clock.now())
            .await
            .map_err(|_| ApiError::InvalidToken)?;
        let user = state
            .store
            .get_user(&session.user_id)
            .await
            .map_err(|_| ApiError::InvalidToken)?;
        Ok(AuthUser(user))
    }
}

/// Client context recorded into audit entries.
#[derive(Clone, Debug, Default)]
pub struct ActorInfo {
    pub ip: String,
    pub user_agent: String,
}

impl<S: Send + Sync> FromRequestParts<S> for ActorInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        Ok(Self { ip, user_agent })
    }
}

fn mask_recipient(recipient: &str) -> String {
    if recipient.contains('@') {
        mask_email(recipient)
    } else {
        mask_phone(recipient)
    }
}

impl SeloServer {
    /// Signing link handed to the notifier together with the cleartext token.
    pub fn signing_url(&self, token: &str) -> String {
        format!("{}/sign/{}", self.config.public_base_url, token)
    }

    /// Resolve a share token to its signer and document. Unknown or expired
    /// tokens are indistinguishable to the caller.
    pub async fn resolve_signer(&self, token: &str) -> Result<(Signer, Document), ApiError> {
        let (share, signer, document) = self
            .store
            .resolve_share_token(&share_token_hash(token))
            .await
            .map_err(|_| ApiError::InvalidToken)?;
        if share.expires_at <= self.clock.now() {
            return Err(ApiError::InvalidToken);
        }
        Ok((signer, document))
    }

    /// Fire-and-forget notification dispatch after a committed transition.
    /// A failed send is recorded as `NOTIFICATION_FAILED` on the entity's
    /// chain and never propagates.
    pub fn notify_detached(
        &self,
        tenant_id: Uuid,
        entity_type: EntityType,
        entity_id: Uuid,
        notification: Notification,
    ) {
        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(err) = notifier.send(notification.clone()).await {
                tracing::warn!(
                    kind = notification.kind(),
                    error = %err,
                    "notification dispatch failed"
                );
                let draft = AuditDraft::new(
                    tenant_id,
                    ActorKind::System,
                    entity_type,
                    entity_id,
                    AuditAction::NotificationFailed,
                )
                .payload(serde_json::json!({
                    "kind": notification.kind(),
                    "recipient": mask_recipient(notification.recipient()),
                }));
                if let Err(err) = store.append_audit(draft).await {
                    tracing::error!(error = %err, "failed to record notification failure");
                }
            }
        });
    }

    /// Stamp the document and flip it to signed.
    ///
    /// Invoked inline by the commit that completes the signer set, and by the
    /// admin re-finalize route. Idempotent: an already-signed document comes
    /// back with its existing certificate and no writes. Unreadable signature
    /// artefacts are skipped; a missing original blob or a content-hash
    /// mismatch is an integrity failure.
    pub async fn finalize_flow(
        &self,
        document_id: &DocumentId,
        actor: &ActorInfo,
        actor_kind: ActorKind,
        actor_id: Option<Uuid>,
    ) -> Result<(Document, Certificate), ApiError> {
        let document = self.store.get_document(document_id).await?;
        if document.status == DocumentStatus::Signed {
            let certificate = self.store.get_certificate(document_id).await?;
            return Ok((document, certificate));
        }
        if document.status.is_terminal() {
            return Err(ApiError::AlreadyTerminal);
        }

        let original = self
            .blob
            .get(&document.storage_key)
            .await
            .map_err(|err| match err {
                BlobError::NotFound(key) => ApiError::Integrity(format!(
                    "original blob {} missing for document {}",
                    key, document.id
                )),
                other => other.into(),
            })?;
        if sha256_hex(&original) != document.sha256 {
            return Err(ApiError::Integrity(format!(
                "stored bytes for document {} do not match its recorded sha256",
                document.id
            )));
        }

        let signers = self.store.list_signers(document_id).await?;
        let mut stamps = Vec::new();
        for signer in signers.iter().filter(|s| s.status == SignerStatus::Signed) {
            let Some(path) = signer.signature_artefact_path.as_deref() else {
                tracing::warn!(signer_id = %signer.id, "signed signer has no artefact path");
                continue;
            };
            match self.blob.get(path).await {
                Ok(png) => stamps.push(SignatureStamp {
                    image_png: png,
                    placement: signer.position.map(|p| StampPlacement {
                        page: p.page,
                        x: p.x,
                        y: p.y,
                    }),
                }),
                Err(err) => {
                    tracing::warn!(
                        signer_id = %signer.id,
                        error = %err,
                        "signature artefact unreadable, stamping without it"
                    );
                }
            }
        }

        let stamped = selo_pdf::stamp_signatures(&original, &stamps)?;
        let finalized_key = signed_variant_key(&document.storage_key);
        self.blob.put(&finalized_key, &stamped).await?;
        let finalized_sha256 = sha256_hex(&stamped);

        let base_draft = |action: AuditAction| {
            let mut draft = AuditDraft::new(
                document.tenant_id.0,
                actor_kind,
                EntityType::Document,
                document.id.0,
                action,
            )
            .client(actor.ip.clone(), actor.user_agent.clone());
            if let Some(actor_id) = actor_id {
                draft = draft.actor_id(actor_id);
            }
            draft
        };

        let pades = base_draft(AuditAction::PadesSigned)
            .payload(serde_json::json!({ "sha256": finalized_sha256 }));
        let certificate_issued = base_draft(AuditAction::CertificateIssued);

        let (document, certificate) = self
            .store
            .finalize_document(
                document_id,
                &finalized_key,
                &finalized_sha256,
                pades,
                certificate_issued,
            )
            .await
            .map_err(|err| match err {
                StoreError::Conflict => {
                    ApiError::Conflict("document is not fully signed".into())
                }
                other => other.into(),
            })?;

        Ok((document, certificate))
    }
}
