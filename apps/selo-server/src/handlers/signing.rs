//! Signer-facing handlers, authenticated by share token only.
//!
//! State machine: pending → viewed → signed, with declined reachable until
//! the signer has signed. Every mutation lands on the signer's audit chain;
//! the commit step drives document finalization when it completes the set.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use selo_audit::{chain, ActorKind, AuditAction, AuditDraft, EntityType};
use selo_blob::BlobStore;
use selo_crypto::{hash_code, mask_email, mask_phone, sha256_hex_concat, six_digit_code, verify_code};
use selo_notify::Notification;
use selo_storage::{
    AuthChannel, CommitSignatureParams, CreateOtpCodeParams, Document, DocumentStatus, Signer,
    SignerStatus, SignaturePosition, Store, OTP_CONTEXT_SIGNING,
};

use crate::handlers::documents::{DocumentResponse, SignerResponse};
use crate::server::{ActorInfo, ApiError, SeloServer};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

// ───────────────────────────── Wire types ─────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub document: DocumentResponse,
    pub signer: SignerResponse,
    pub download_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpStartResponse {
    /// Masked targets the codes went to, e.g. `j***@e***.com`.
    pub sent_to: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OtpVerifyRequest {
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct OtpVerifyResponse {
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRequest {
    pub page: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub client_fingerprint: String,
    pub signature_image_base64: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub short_code: String,
    pub signature_hash: String,
    pub is_complete: bool,
}

// ───────────────────────────── Guards ─────────────────────────────

/// Resolve the token and reject operations on settled documents.
async fn resolve_active(
    server: &SeloServer,
    token: &str,
) -> Result<(Signer, Document), ApiError> {
    let (signer, document) = server.resolve_signer(token).await?;
    if document.status.is_terminal() {
        return Err(ApiError::AlreadyTerminal);
    }
    Ok((signer, document))
}

/// Operations past the summary step require a viewed, still-active signer.
fn require_viewed(signer: &Signer) -> Result<(), ApiError> {
    match signer.status {
        SignerStatus::Viewed => Ok(()),
        SignerStatus::Pending => Err(ApiError::Validation(
            "document has not been viewed yet".into(),
        )),
        SignerStatus::Signed | SignerStatus::Declined => Err(ApiError::AlreadyTerminal),
    }
}

fn signer_draft(
    document: &Document,
    signer: &Signer,
    actor: &ActorInfo,
    action: AuditAction,
) -> AuditDraft {
    AuditDraft::new(
        document.tenant_id.0,
        ActorKind::Signer,
        EntityType::Signer,
        signer.id.0,
        action,
    )
    .actor_id(signer.id.0)
    .client(actor.ip.clone(), actor.user_agent.clone())
}

// ───────────────────────────── Operations ─────────────────────────────

/// First fetch moves pending → viewed; later fetches are read-only.
pub async fn summary(
    server: &SeloServer,
    actor: &ActorInfo,
    token: &str,
) -> Result<SummaryResponse, ApiError> {
    let (signer, document) = resolve_active(server, token).await?;

    let signer = server
        .store
        .record_signer_view(
            &signer.id,
            signer_draft(&document, &signer, actor, AuditAction::Viewed),
        )
        .await?;

    Ok(SummaryResponse {
        document: DocumentResponse::from(&document),
        signer: SignerResponse::from(&signer),
        download_url: format!("{}/document", server.signing_url(token)),
    })
}

/// Raw document bytes for the signer's preview.
pub async fn download(server: &SeloServer, token: &str) -> Result<(String, Vec<u8>), ApiError> {
    let (_, document) = server.resolve_signer(token).await?;
    let bytes = server.blob.get(&document.storage_key).await?;
    Ok((document.mime_type, bytes))
}

pub async fn identify(
    server: &SeloServer,
    token: &str,
    request: IdentifyRequest,
) -> Result<SignerResponse, ApiError> {
    let (signer, _) = resolve_active(server, token).await?;
    require_viewed(&signer)?;

    if request.cpf.is_none() && request.phone.is_none() {
        return Err(ApiError::Validation("nothing to update".into()));
    }

    let signer = server
        .store
        .update_signer_identity(&signer.id, request.cpf.as_deref(), request.phone.as_deref())
        .await?;
    Ok(SignerResponse::from(&signer))
}

/// Issue one code per configured channel, audit each send, deliver after the
/// rows commit.
pub async fn otp_start(
    server: &SeloServer,
    actor: &ActorInfo,
    token: &str,
) -> Result<OtpStartResponse, ApiError> {
    let (signer, document) = resolve_active(server, token).await?;
    require_viewed(&signer)?;

    let expires_at = server.clock.now() + Duration::minutes(server.config.otp_ttl_minutes);
    let mut sent_to = Vec::new();

    for channel in &signer.auth_channels {
        let (recipient, masked) = match channel {
            AuthChannel::Email => (signer.email.clone(), mask_email(&signer.email)),
            AuthChannel::Whatsapp => match &signer.phone {
                Some(phone) => (phone.clone(), mask_phone(phone)),
                None => {
                    tracing::warn!(signer_id = %signer.id, "whatsapp channel without phone, skipping");
                    continue;
                }
            },
        };

        let code = six_digit_code(server.entropy.as_ref());
        let code_hash = hash_code(&code, server.config.bcrypt_cost)?;

        server
            .store
            .create_otp_code(&CreateOtpCodeParams {
                recipient: recipient.clone(),
                channel: *channel,
                code_hash,
                expires_at,
                context: OTP_CONTEXT_SIGNING.into(),
            })
            .await?;

        server
            .store
            .append_audit(
                signer_draft(&document, &signer, actor, AuditAction::OtpSent).payload(
                    serde_json::json!({
                        "channel": channel.to_string(),
                        "maskedRecipient": masked,
                    }),
                ),
            )
            .await?;

        server.notify_detached(
            document.tenant_id.0,
            EntityType::Signer,
            signer.id.0,
            Notification::OtpCode {
                channel: *channel,
                recipient,
                code,
            },
        );
        sent_to.push(masked);
    }

    if sent_to.is_empty() {
        return Err(ApiError::Validation(
            "signer has no reachable auth channel".into(),
        ));
    }
    Ok(OtpStartResponse { sent_to })
}

/// Check the presented code against the most recent one issued to any of the
/// signer's contacts. Success is one-shot: the row is destroyed.
pub async fn otp_verify(
    server: &SeloServer,
    actor: &ActorInfo,
    token: &str,
    request: OtpVerifyRequest,
) -> Result<OtpVerifyResponse, ApiError> {
    let (signer, document) = resolve_active(server, token).await?;
    require_viewed(&signer)?;

    let fail = |reason: &str| {
        signer_draft(&document, &signer, actor, AuditAction::OtpFailed)
            .payload(serde_json::json!({ "reason": reason }))
    };

    let code = match server
        .store
        .latest_otp_code(&signer.contacts(), OTP_CONTEXT_SIGNING)
        .await
    {
        Ok(code) => code,
        Err(selo_storage::StoreError::NotFound) => {
            // A consumed code replayed looks like a wrong code.
            server.store.append_audit(fail("mismatch")).await?;
            return Err(ApiError::OtpWrong);
        }
        Err(err) => return Err(err.into()),
    };

    if code.expires_at <= server.clock.now() {
        let _ = server.store.delete_otp_code(&code.id).await;
        server.store.append_audit(fail("expired")).await?;
        return Err(ApiError::OtpExpired);
    }

    if !verify_code(request.otp.trim(), &code.code_hash) {
        server.store.append_audit(fail("mismatch")).await?;
        return Err(ApiError::OtpWrong);
    }

    server.store.delete_otp_code(&code.id).await?;
    server
        .store
        .append_audit(signer_draft(&document, &signer, actor, AuditAction::OtpVerified))
        .await?;

    Ok(OtpVerifyResponse { verified: true })
}

pub async fn position(
    server: &SeloServer,
    token: &str,
    request: PositionRequest,
) -> Result<SignerResponse, ApiError> {
    let (signer, _) = resolve_active(server, token).await?;
    require_viewed(&signer)?;

    if request.page == 0 {
        return Err(ApiError::Validation("page numbers are 1-indexed".into()));
    }
    if !request.x.is_finite() || !request.y.is_finite() || request.x < 0.0 || request.y < 0.0 {
        return Err(ApiError::Validation("coordinates must be non-negative".into()));
    }

    let signer = server
        .store
        .set_signer_position(
            &signer.id,
            SignaturePosition {
                page: request.page,
                x: request.x,
                y: request.y,
            },
        )
        .await?;
    Ok(SignerResponse::from(&signer))
}

/// The signing step: persist the artefact, flip the signer, and finalize the
/// document when this commit completes the set.
pub async fn commit(
    server: &SeloServer,
    actor: &ActorInfo,
    token: &str,
    request: CommitRequest,
) -> Result<CommitResponse, ApiError> {
    let (signer, document) = resolve_active(server, token).await?;
    require_viewed(&signer)?;

    if request.client_fingerprint.trim().is_empty() {
        return Err(ApiError::Validation("clientFingerprint is required".into()));
    }
    let image = BASE64
        .decode(request.signature_image_base64.trim())
        .map_err(|_| ApiError::Validation("signatureImageBase64 is not valid base64".into()))?;
    if !image.starts_with(PNG_MAGIC) {
        return Err(ApiError::Validation("signature image must be a PNG".into()));
    }

    let signed_at_str = chain::timestamp_string(server.clock.now());
    let signed_at = chain::parse_timestamp(&signed_at_str)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let signature_hash = sha256_hex_concat(&[
        &document.sha256,
        &signer.id.to_string(),
        &signed_at_str,
        request.client_fingerprint.trim(),
    ]);
    let short_code = signature_hash[..server.config.shortcode_length].to_uppercase();

    let artefact_key = format!("{}/signatures/{}.png", document.tenant_id, signer.id);
    server.blob.put(&artefact_key, &image).await?;

    let signed_audit = signer_draft(&document, &signer, actor, AuditAction::Signed).payload(
        serde_json::json!({
            "signatureHash": signature_hash,
            "shortCode": short_code,
            "artefactPath": artefact_key,
        }),
    );
    let status_audit = AuditDraft::new(
        document.tenant_id.0,
        ActorKind::Signer,
        EntityType::Document,
        document.id.0,
        AuditAction::StatusChanged,
    )
    .actor_id(signer.id.0)
    .client(actor.ip.clone(), actor.user_agent.clone())
    .payload(serde_json::json!({
        "newStatus": DocumentStatus::PartiallySigned.to_string(),
    }));

    let outcome = match server
        .store
        .commit_signature(
            &CommitSignatureParams {
                signer_id: signer.id,
                signed_at,
                signature_hash: signature_hash.clone(),
                signature_artefact_path: artefact_key.clone(),
            },
            signed_audit,
            status_audit,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            // The transaction rolled back; the artefact written above is
            // unreferenced, so take it back out.
            let _ = server.blob.remove(&artefact_key).await;
            return Err(err.into());
        }
    };

    let mut is_complete = false;
    if outcome.all_signed {
        match server
            .finalize_flow(&document.id, actor, ActorKind::Signer, Some(signer.id.0))
            .await
        {
            Ok(_) => {
                is_complete = true;
                notify_completion(server, &document, &signer, &short_code).await;
            }
            Err(err) => {
                // The signature is committed; finalization can be replayed
                // through the admin route.
                tracing::error!(
                    document_id = %document.id,
                    error = %err,
                    "finalization failed after last commit"
                );
            }
        }
    }

    Ok(CommitResponse {
        short_code,
        signature_hash,
        is_complete,
    })
}

pub async fn decline(
    server: &SeloServer,
    actor: &ActorInfo,
    token: &str,
) -> Result<SignerResponse, ApiError> {
    let (signer, document) = resolve_active(server, token).await?;

    let signer = server
        .store
        .decline_signer(
            &signer.id,
            signer_draft(&document, &signer, actor, AuditAction::Declined),
        )
        .await?;
    Ok(SignerResponse::from(&signer))
}

async fn notify_completion(
    server: &SeloServer,
    document: &Document,
    committing_signer: &Signer,
    short_code: &str,
) {
    if let Ok(owner) = server.store.get_user(&document.owner_id).await {
        server.notify_detached(
            document.tenant_id.0,
            EntityType::Document,
            document.id.0,
            Notification::DocumentCompleted {
                recipient: owner.email,
                document_title: document.title.clone(),
                short_code: None,
            },
        );
    }
    if let Ok(signers) = server.store.list_signers(&document.id).await {
        for signer in signers {
            let short_code = (signer.id == committing_signer.id).then(|| short_code.to_string());
            server.notify_detached(
                document.tenant_id.0,
                EntityType::Signer,
                signer.id.0,
                Notification::DocumentCompleted {
                    recipient: signer.email.clone(),
                    document_title: document.title.clone(),
                    short_code,
                },
            );
        }
    }
}

// ───────────────────────────── Routes ─────────────────────────────

pub async fn summary_route(
    State(server): State<Arc<SeloServer>>,
    actor: ActorInfo,
    Path(token): Path<String>,
) -> Result<Json<SummaryResponse>, ApiError> {
    Ok(Json(summary(&server, &actor, &token).await?))
}

pub async fn download_route(
    State(server): State<Arc<SeloServer>>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let (mime_type, bytes) = download(&server, &token).await?;
    Ok(([(header::CONTENT_TYPE, mime_type)], bytes).into_response())
}

pub async fn identify_route(
    State(server): State<Arc<SeloServer>>,
    Path(token): Path<String>,
    Json(request): Json<IdentifyRequest>,
) -> Result<Json<SignerResponse>, ApiError> {
    Ok(Json(identify(&server, &token, request).await?))
}

pub async fn otp_start_route(
    State(server): State<Arc<SeloServer>>,
    actor: ActorInfo,
    Path(token): Path<String>,
) -> Result<Json<OtpStartResponse>, ApiError> {
    Ok(Json(otp_start(&server, &actor, &token).await?))
}

pub async fn otp_verify_route(
    State(server): State<Arc<SeloServer>>,
    actor: ActorInfo,
    Path(token): Path<String>,
    Json(request): Json<OtpVerifyRequest>,
) -> Result<Json<OtpVerifyResponse>, ApiError> {
    Ok(Json(otp_verify(&server, &actor, &token, request).await?))
}

pub async fn position_route(
    State(server): State<Arc<SeloServer>>,
    Path(token): Path<String>,
    Json(request): Json<PositionRequest>,
) -> Result<Json<SignerResponse>, ApiError> {
    Ok(Json(position(&server, &token, request).await?))
}

pub async fn commit_route(
    State(server): State<Arc<SeloServer>>,
    actor: ActorInfo,
    Path(token): Path<String>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    Ok(Json(commit(&server, &actor, &token, request).await?))
}

pub async fn decline_route(
    State(server): State<Arc<SeloServer>>,
    actor: ActorInfo,
    Path(token): Path<String>,
) -> Result<Json<SignerResponse>, ApiError> {
    Ok(Json(decline(&server, &actor, &token).await?))
}
