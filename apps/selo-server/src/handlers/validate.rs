//! Public provenance check: did this exact file come out of selo?
//!
//! Pure content-hash lookup, no authentication, no side effects.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use selo_crypto::sha256_hex;
use selo_storage::{DocumentStatus, SignerStatus, Store, StoreError};

use crate::server::{ApiError, SeloServer};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedSigner {
    pub name: String,
    pub email: String,
    pub status: SignerStatus,
    pub signed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedDocument {
    pub title: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub owner_name: String,
    pub signers: Vec<ValidatedSigner>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<ValidatedDocument>,
}

/// Hash the bytes and report the matching document, if any.
pub async fn validate_bytes(
    server: &SeloServer,
    bytes: &[u8],
) -> Result<ValidationResponse, ApiError> {
    let sha256 = sha256_hex(bytes);
    let document = match server.store.find_document_by_sha256(&sha256).await {
        Ok(document) => document,
        Err(StoreError::NotFound) => {
            return Ok(ValidationResponse {
                valid: false,
                document: None,
            })
        }
        Err(err) => return Err(err.into()),
    };

    let owner_name = server
        .store
        .get_user(&document.owner_id)
        .await
        .map(|owner| owner.name)
        .unwrap_or_default();
    let signers = server
        .store
        .list_signers(&document.id)
        .await?
        .into_iter()
        .map(|signer| ValidatedSigner {
            name: signer.name,
            email: signer.email,
            status: signer.status,
            signed_at: signer.signed_at,
        })
        .collect();

    Ok(ValidationResponse {
        valid: true,
        document: Some(ValidatedDocument {
            title: document.title,
            status: document.status,
            created_at: document.created_at,
            owner_name,
            signers,
        }),
    })
}

pub async fn validate_route(
    State(server): State<Arc<SeloServer>>,
    mut multipart: Multipart,
) -> Result<Json<ValidationResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Validation(err.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "documentFile" || name == "file" {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::Validation(err.to_string()))?;
            return Ok(Json(validate_bytes(&server, &bytes).await?));
        }
    }
    Err(ApiError::Validation("documentFile is required".into()))
}
