//! Public provenance check.

use selo_blob::BlobStore;
use selo_storage::{DocumentStatus, SignerStatus, Store};

use crate::handlers::signing::{self, CommitRequest};
use crate::handlers::validate;
use crate::tests::common::*;

#[tokio::test]
async fn uploaded_bytes_validate_positive() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;

    let bytes = ctx.server.blob.get(&document.storage_key).await.unwrap();
    let report = validate::validate_bytes(&ctx.server, &bytes).await.unwrap();

    assert!(report.valid);
    let validated = report.document.unwrap();
    assert_eq!(validated.title, "NDA");
    assert_eq!(validated.status, DocumentStatus::Ready);
    assert_eq!(validated.owner_name, "Olivia Owner");
}

#[tokio::test]
async fn finalized_bytes_validate_with_signed_signers() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (_, token) = invite(&ctx, &document, "ana@client.test").await;
    let original = ctx.server.blob.get(&document.storage_key).await.unwrap();

    signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    signing::commit(
        &ctx.server,
        &actor(),
        &token,
        CommitRequest {
            client_fingerprint: "fp1".into(),
            signature_image_base64: png_base64(),
        },
    )
    .await
    .unwrap();

    let finalized = ctx.server.store.get_document(&document.id).await.unwrap();
    let stamped = ctx.server.blob.get(&finalized.storage_key).await.unwrap();

    let report = validate::validate_bytes(&ctx.server, &stamped).await.unwrap();
    assert!(report.valid);
    let validated = report.document.unwrap();
    assert_eq!(validated.status, DocumentStatus::Signed);
    assert_eq!(validated.signers.len(), 1);
    assert_eq!(validated.signers[0].status, SignerStatus::Signed);
    assert!(validated.signers[0].signed_at.is_some());

    // Finalization rewrote the document's content hash, so the original
    // upload no longer proves provenance
    let report = validate::validate_bytes(&ctx.server, &original).await.unwrap();
    assert!(!report.valid);
}

#[tokio::test]
async fn tampered_bytes_validate_negative() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;

    let mut bytes = ctx.server.blob.get(&document.storage_key).await.unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;

    let report = validate::validate_bytes(&ctx.server, &bytes).await.unwrap();
    assert!(!report.valid);
    assert!(report.document.is_none());
}
