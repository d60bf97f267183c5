//! Document handlers: upload, invite, status transitions, audit trail,
//! chain verification, admin re-finalize.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use selo_audit::{chain, ActorKind, AuditAction, AuditDraft, AuditEvent, EntityType};
use selo_blob::BlobStore;
use selo_crypto::{generate_share_token, sha256_hex, share_token_hash};
use selo_notify::Notification;
use selo_storage::{
    AuthChannel, CreateDocumentParams, CreateShareTokenParams, CreateSignerParams, Document,
    DocumentId, DocumentStatus, Role, Signer, SignerId, Store, User,
};

use crate::server::{ActorInfo, ApiError, AuthUser, SeloServer};

const PDF_MAGIC: &[u8] = b"%PDF-";

// ───────────────────────────── Wire types ─────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: String,
    pub title: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub status: DocumentStatus,
    pub deadline_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for DocumentResponse {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.to_string(),
            title: document.title.clone(),
            mime_type: document.mime_type.clone(),
            size_bytes: document.size_bytes,
            sha256: document.sha256.clone(),
            status: document.status,
            deadline_at: document.deadline_at,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub status: selo_storage::SignerStatus,
    pub order: i32,
    pub signed_at: Option<DateTime<Utc>>,
}

impl From<&Signer> for SignerResponse {
    fn from(signer: &Signer) -> Self {
        Self {
            id: signer.id.to_string(),
            name: signer.name.clone(),
            email: signer.email.clone(),
            status: signer.status,
            order: signer.order_index,
            signed_at: signer.signed_at,
        }
    }
}

/// Parsed multipart body of `POST /documents`.
#[derive(Debug)]
pub struct UploadRequest {
    pub title: Option<String>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerDescriptor {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub qualification: Option<String>,
    pub auth_channels: Vec<AuthChannel>,
    #[serde(default)]
    pub order: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub signers: Vec<SignerDescriptor>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResponse {
    pub document_id: String,
    pub storage_key: String,
    pub sha256: String,
    pub issued_at: DateTime<Utc>,
}

// ───────────────────────────── Operations ─────────────────────────────

/// Resolve the document and check the acting user may operate on it.
/// Cross-tenant lookups read as not-found so document ids stay unguessable.
pub async fn authorize_document(
    server: &SeloServer,
    user: &User,
    document_id: &DocumentId,
) -> Result<Document, ApiError> {
    let document = server.store.get_document(document_id).await?;
    if document.tenant_id != user.tenant_id {
        return Err(ApiError::NotFound);
    }
    let is_owner = document.owner_id == user.id;
    let is_admin = matches!(user.role, Role::Admin | Role::SuperAdmin);
    if !is_owner && !is_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(document)
}

/// Store the uploaded bytes and create the document in ready state.
pub async fn upload_document(
    server: &SeloServer,
    user: &User,
    actor: &ActorInfo,
    request: UploadRequest,
) -> Result<Document, ApiError> {
    if !request.bytes.starts_with(PDF_MAGIC) {
        return Err(ApiError::Validation("uploaded file is not a PDF".into()));
    }

    let document_id = DocumentId::new();
    let extension = std::path::Path::new(&request.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("pdf")
        .to_string();
    let storage_key = format!("{}/{}.{}", user.tenant_id, document_id, extension);
    let sha256 = sha256_hex(&request.bytes);
    let title = request
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| request.file_name.clone());

    server.blob.put(&storage_key, &request.bytes).await?;

    let audit = AuditDraft::new(
        user.tenant_id.0,
        ActorKind::User,
        EntityType::Document,
        document_id.0,
        AuditAction::StorageUploaded,
    )
    .actor_id(user.id.0)
    .client(actor.ip.clone(), actor.user_agent.clone())
    .payload(serde_json::json!({
        "fileName": request.file_name,
        "sha256": sha256,
    }));

    let params = CreateDocumentParams {
        id: document_id,
        tenant_id: user.tenant_id,
        owner_id: user.id,
        title,
        mime_type: request.mime_type,
        size_bytes: request.bytes.len() as i64,
        storage_key: storage_key.clone(),
        sha256,
        deadline_at: request.deadline_at,
    };

    match server.store.create_document(&params, audit).await {
        Ok(document) => Ok(document),
        Err(err) => {
            // The row never committed; don't leave the blob orphaned.
            let _ = server.blob.remove(&storage_key).await;
            Err(err.into())
        }
    }
}

/// Create signer rows with share tokens and hand each cleartext token to the
/// notifier exactly once.
pub async fn invite_signers(
    server: &SeloServer,
    user: &User,
    actor: &ActorInfo,
    document_id: &DocumentId,
    request: InviteRequest,
) -> Result<Vec<Signer>, ApiError> {
    let document = authorize_document(server, user, document_id).await?;
    if document.status.is_terminal() {
        return Err(ApiError::AlreadyTerminal);
    }
    if request.signers.is_empty() {
        return Err(ApiError::Validation("at least one signer is required".into()));
    }

    let mut created = Vec::with_capacity(request.signers.len());
    for (index, descriptor) in request.signers.iter().enumerate() {
        if descriptor.auth_channels.is_empty() {
            return Err(ApiError::Validation(format!(
                "signer {} has no auth channels",
                descriptor.email
            )));
        }
        if descriptor.email.trim().is_empty() || !descriptor.email.contains('@') {
            return Err(ApiError::Validation("signer email is invalid".into()));
        }
        if descriptor.auth_channels.contains(&AuthChannel::Whatsapp)
            && descriptor.phone.is_none()
        {
            return Err(ApiError::Validation(format!(
                "signer {} uses whatsapp but has no phone",
                descriptor.email
            )));
        }

        let signer_id = SignerId::new();
        let token = generate_share_token(server.entropy.as_ref());
        let expires_at = document
            .deadline_at
            .unwrap_or_else(|| server.clock.now() + Duration::days(server.config.invite_ttl_days));

        let audit = AuditDraft::new(
            user.tenant_id.0,
            ActorKind::User,
            EntityType::Signer,
            signer_id.0,
            AuditAction::Invited,
        )
        .actor_id(user.id.0)
        .client(actor.ip.clone(), actor.user_agent.clone())
        .payload(serde_json::json!({
            "documentId": document.id.to_string(),
            "recipient": descriptor.email,
        }));

        let signer = server
            .store
            .create_signer(
                &CreateSignerParams {
                    id: signer_id,
                    document_id: document.id,
                    name: descriptor.name.clone(),
                    email: descriptor.email.clone(),
                    phone: descriptor.phone.clone(),
                    cpf: descriptor.cpf.clone(),
                    qualification: descriptor.qualification.clone(),
                    auth_channels: descriptor.auth_channels.clone(),
                    order_index: descriptor.order.unwrap_or(index as i32),
                },
                &CreateShareTokenParams {
                    document_id: document.id,
                    signer_id,
                    token_hash: share_token_hash(&token),
                    expires_at,
                },
                audit,
            )
            .await?;

        // The only crossing of the cleartext token: straight to the notifier,
        // after the row committed.
        let (channel, recipient) = if descriptor.auth_channels.contains(&AuthChannel::Email) {
            (AuthChannel::Email, descriptor.email.clone())
        } else {
            (
                AuthChannel::Whatsapp,
                descriptor.phone.clone().unwrap_or_default(),
            )
        };
        server.notify_detached(
            user.tenant_id.0,
            EntityType::Signer,
            signer.id.0,
            Notification::SignerInvited {
                channel,
                recipient,
                signer_name: signer.name.clone(),
                document_title: document.title.clone(),
                signing_url: server.signing_url(&token),
                message: request.message.clone(),
            },
        );

        created.push(signer);
    }

    Ok(created)
}

/// Shared by cancel, expire and the deadline sweep.
pub async fn change_status(
    server: &SeloServer,
    user: &User,
    actor: &ActorInfo,
    document_id: &DocumentId,
    new_status: DocumentStatus,
) -> Result<Document, ApiError> {
    authorize_document(server, user, document_id).await?;
    let audit = AuditDraft::new(
        user.tenant_id.0,
        ActorKind::User,
        EntityType::Document,
        document_id.0,
        AuditAction::StatusChanged,
    )
    .actor_id(user.id.0)
    .client(actor.ip.clone(), actor.user_agent.clone())
    .payload(serde_json::json!({ "newStatus": new_status.to_string() }));

    Ok(server
        .store
        .update_document_status(document_id, new_status, audit)
        .await?)
}

/// Document chain plus all signer chains, merged ascending.
pub async fn audit_trail(
    server: &SeloServer,
    user: &User,
    document_id: &DocumentId,
) -> Result<Vec<AuditEvent>, ApiError> {
    let document = authorize_document(server, user, document_id).await?;

    let mut events = server.store.list_chain(&document.id.0).await?;
    for signer in server.store.list_signers(&document.id).await? {
        events.extend(server.store.list_chain(&signer.id.0).await?);
    }
    events.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
    Ok(events)
}

/// Composite verification of every chain belonging to the document.
pub async fn verify_chains(
    server: &SeloServer,
    user: &User,
    document_id: &DocumentId,
) -> Result<ChainVerifyResponse, ApiError> {
    let document = authorize_document(server, user, document_id).await?;

    let document_chain = server.store.list_chain(&document.id.0).await?;
    let mut signer_chains = Vec::new();
    for signer in server.store.list_signers(&document.id).await? {
        signer_chains.push((signer.id.0, server.store.list_chain(&signer.id.0).await?));
    }

    let verification = chain::verify_document_chains(
        &server.config.genesis_prefix,
        &document.tenant_id.0,
        &document.id.0,
        &document_chain,
        &signer_chains,
    );

    Ok(match verification {
        chain::ChainVerification::Valid { count } => ChainVerifyResponse {
            is_valid: true,
            count: Some(count),
            broken_event_id: None,
            reason: None,
        },
        chain::ChainVerification::Broken { event_id, reason } => ChainVerifyResponse {
            is_valid: false,
            count: None,
            broken_event_id: Some(event_id.to_string()),
            reason: Some(reason.to_string()),
        },
    })
}

// ───────────────────────────── Routes ─────────────────────────────

pub async fn create_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    actor: ActorInfo,
    mut multipart: Multipart,
) -> Result<Json<DocumentResponse>, ApiError> {
    let mut title = None;
    let mut deadline_at = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Validation(err.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| ApiError::Validation(err.to_string()))?,
                );
            }
            "deadlineAt" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|err| ApiError::Validation(err.to_string()))?;
                let parsed = DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|_| ApiError::Validation("deadlineAt must be RFC 3339".into()))?;
                deadline_at = Some(parsed.with_timezone(&Utc));
            }
            "documentFile" => {
                let file_name = field.file_name().unwrap_or("document.pdf").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/pdf")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::Validation(err.to_string()))?
                    .to_vec();
                file = Some((file_name, mime_type, bytes));
            }
            _ => {}
        }
    }

    let (file_name, mime_type, bytes) =
        file.ok_or_else(|| ApiError::Validation("documentFile is required".into()))?;
    let document = upload_document(
        &server,
        &user,
        &actor,
        UploadRequest {
            title,
            deadline_at,
            file_name,
            mime_type,
            bytes,
        },
    )
    .await?;
    Ok(Json(DocumentResponse::from(&document)))
}

pub async fn get_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document_id = parse_document_id(&id)?;
    let document = authorize_document(&server, &user, &document_id).await?;
    Ok(Json(DocumentResponse::from(&document)))
}

pub async fn invite_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    actor: ActorInfo,
    Path(id): Path<String>,
    Json(request): Json<InviteRequest>,
) -> Result<Json<Vec<SignerResponse>>, ApiError> {
    let document_id = parse_document_id(&id)?;
    let signers = invite_signers(&server, &user, &actor, &document_id, request).await?;
    Ok(Json(signers.iter().map(SignerResponse::from).collect()))
}

pub async fn cancel_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    actor: ActorInfo,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document_id = parse_document_id(&id)?;
    let document = change_status(
        &server,
        &user,
        &actor,
        &document_id,
        DocumentStatus::Cancelled,
    )
    .await?;
    Ok(Json(DocumentResponse::from(&document)))
}

pub async fn expire_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    actor: ActorInfo,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document_id = parse_document_id(&id)?;
    let document = change_status(
        &server,
        &user,
        &actor,
        &document_id,
        DocumentStatus::Expired,
    )
    .await?;
    Ok(Json(DocumentResponse::from(&document)))
}

pub async fn refinalize_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    actor: ActorInfo,
    Path(id): Path<String>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let document_id = parse_document_id(&id)?;
    authorize_document(&server, &user, &document_id).await?;
    let (_, certificate) = server
        .finalize_flow(&document_id, &actor, ActorKind::User, Some(user.id.0))
        .await?;
    Ok(Json(CertificateResponse {
        document_id: certificate.document_id.to_string(),
        storage_key: certificate.storage_key,
        sha256: certificate.sha256,
        issued_at: certificate.issued_at,
    }))
}

pub async fn audit_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let document_id = parse_document_id(&id)?;
    Ok(Json(audit_trail(&server, &user, &document_id).await?))
}

pub async fn verify_chain_route(
    State(server): State<Arc<SeloServer>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ChainVerifyResponse>, ApiError> {
    let document_id = parse_document_id(&id)?;
    Ok(Json(verify_chains(&server, &user, &document_id).await?))
}

fn parse_document_id(raw: &str) -> Result<DocumentId, ApiError> {
    raw.parse::<DocumentId>().map_err(|_| ApiError::NotFound)
}
