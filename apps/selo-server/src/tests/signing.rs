//! The signer state machine, end to end.

use chrono::Duration;

use selo_audit::{chain, AuditAction};
use selo_blob::BlobStore;
use selo_crypto::{sha256_hex, share_token_hash};
use selo_storage::{DocumentStatus, SignerStatus, Store, StoreError, OTP_CONTEXT_SIGNING};

use crate::handlers::documents;
use crate::handlers::signing::{
    self, CommitRequest, IdentifyRequest, OtpVerifyRequest, PositionRequest,
};
use crate::server::ApiError;
use crate::tests::common::*;

fn commit_request() -> CommitRequest {
    CommitRequest {
        client_fingerprint: "fp1".into(),
        signature_image_base64: png_base64(),
    }
}

#[tokio::test]
async fn single_signer_happy_path() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (signer, token) = invite(&ctx, &document, "ana@client.test").await;

    // The cleartext token hashes to the persisted lookup hash
    let (share, _, _) = ctx
        .server
        .store
        .resolve_share_token(&share_token_hash(&token))
        .await
        .unwrap();
    assert_eq!(share.token_hash, share_token_hash(&token));
    assert_eq!(share.signer_id, signer.id);

    // Summary flips pending → viewed
    let summary = signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    assert_eq!(summary.signer.status, SignerStatus::Viewed);

    // Identify
    signing::identify(
        &ctx.server,
        &token,
        IdentifyRequest {
            cpf: Some("123.456.789-00".into()),
            phone: None,
        },
    )
    .await
    .unwrap();

    // OTP round
    let started = signing::otp_start(&ctx.server, &actor(), &token).await.unwrap();
    assert_eq!(started.sent_to, vec!["a***@c***.test".to_string()]);
    let code = delivered_code(&ctx, "ana@client.test").await;
    assert_eq!(code.len(), 6);

    let verified = signing::otp_verify(
        &ctx.server,
        &actor(),
        &token,
        OtpVerifyRequest { otp: code.clone() },
    )
    .await
    .unwrap();
    assert!(verified.verified);

    // The code row was destroyed on success
    assert!(matches!(
        ctx.server
            .store
            .latest_otp_code(&["ana@client.test".into()], OTP_CONTEXT_SIGNING)
            .await,
        Err(StoreError::NotFound)
    ));

    // Position, then commit
    signing::position(
        &ctx.server,
        &token,
        PositionRequest {
            page: 1,
            x: 100.0,
            y: 120.0,
        },
    )
    .await
    .unwrap();

    let receipt = signing::commit(&ctx.server, &actor(), &token, commit_request())
        .await
        .unwrap();
    assert!(receipt.is_complete);
    assert_eq!(receipt.short_code.len(), 6);
    assert_eq!(
        receipt.short_code,
        receipt.signature_hash[..6].to_uppercase()
    );

    // Document finalized: new key, matching hash, certificate issued
    let finalized = ctx.server.store.get_document(&document.id).await.unwrap();
    assert_eq!(finalized.status, DocumentStatus::Signed);
    assert!(finalized.storage_key.ends_with("-signed.pdf"));
    assert_ne!(finalized.sha256, document.sha256);
    let stamped = ctx.server.blob.get(&finalized.storage_key).await.unwrap();
    assert_eq!(sha256_hex(&stamped), finalized.sha256);
    ctx.server.store.get_certificate(&document.id).await.unwrap();

    // Signer record carries the signature evidence
    let signer = ctx.server.store.get_signer(&signer.id).await.unwrap();
    assert_eq!(signer.status, SignerStatus::Signed);
    assert_eq!(signer.signature_hash.as_deref(), Some(receipt.signature_hash.as_str()));
    let artefact = ctx
        .server
        .blob
        .get(signer.signature_artefact_path.as_deref().unwrap())
        .await
        .unwrap();
    assert!(artefact.starts_with(b"\x89PNG"));

    // Every expected action code is on the record, and the chains verify
    let trail = documents::audit_trail(&ctx.server, &ctx.owner, &document.id)
        .await
        .unwrap();
    for action in [
        AuditAction::StorageUploaded,
        AuditAction::Invited,
        AuditAction::Viewed,
        AuditAction::OtpSent,
        AuditAction::OtpVerified,
        AuditAction::Signed,
        AuditAction::StatusChanged,
        AuditAction::PadesSigned,
        AuditAction::CertificateIssued,
    ] {
        assert!(
            trail.iter().any(|e| e.action == action),
            "missing action {:?}",
            action
        );
    }

    let verification = documents::verify_chains(&ctx.server, &ctx.owner, &document.id)
        .await
        .unwrap();
    assert!(verification.is_valid);
    assert_eq!(verification.count, Some(9));

    // Completion notifications reached owner and signer
    settle().await;
    let completed = ctx.notifier.sent_of_kind("document_completed");
    assert_eq!(completed.len(), 2);
}

#[tokio::test]
async fn two_signers_concurrent_commit_finalizes_once() {
    let ctx = test_context().await;
    let document = upload(&ctx, "Joint NDA", None).await;
    let (_, token_a) = invite(&ctx, &document, "a@client.test").await;
    let (_, token_b) = invite(&ctx, &document, "b@client.test").await;

    signing::summary(&ctx.server, &actor(), &token_a).await.unwrap();
    signing::summary(&ctx.server, &actor(), &token_b).await.unwrap();

    let actor = actor();
    let (ra, rb) = tokio::join!(
        signing::commit(&ctx.server, &actor, &token_a, commit_request()),
        signing::commit(&ctx.server, &actor, &token_b, commit_request()),
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(
        [ra.is_complete, rb.is_complete]
            .iter()
            .filter(|c| **c)
            .count(),
        1,
        "exactly one commit completes the document"
    );

    let finalized = ctx.server.store.get_document(&document.id).await.unwrap();
    assert_eq!(finalized.status, DocumentStatus::Signed);
    ctx.server.store.get_certificate(&document.id).await.unwrap();

    let verification = documents::verify_chains(&ctx.server, &ctx.owner, &document.id)
        .await
        .unwrap();
    assert!(verification.is_valid);
}

#[tokio::test]
async fn otp_replay_is_rejected_and_audited() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (signer, token) = invite(&ctx, &document, "ana@client.test").await;

    signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    signing::otp_start(&ctx.server, &actor(), &token).await.unwrap();
    let code = delivered_code(&ctx, "ana@client.test").await;

    signing::otp_verify(
        &ctx.server,
        &actor(),
        &token,
        OtpVerifyRequest { otp: code.clone() },
    )
    .await
    .unwrap();

    // Replaying the consumed code reads as a wrong code
    let err = signing::otp_verify(&ctx.server, &actor(), &token, OtpVerifyRequest { otp: code })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::OtpWrong));

    let events = ctx.server.store.list_chain(&signer.id.0).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.action == AuditAction::OtpFailed)
            .count(),
        1
    );
    assert!(chain::verify_chain(chain::DEFAULT_GENESIS_PREFIX, &signer.id.0, &events).is_valid());
}

#[tokio::test]
async fn wrong_code_fails_without_consuming() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (_, token) = invite(&ctx, &document, "ana@client.test").await;

    signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    signing::otp_start(&ctx.server, &actor(), &token).await.unwrap();
    let code = delivered_code(&ctx, "ana@client.test").await;

    let wrong = if code == "000000" { "000001" } else { "000000" };
    let err = signing::otp_verify(
        &ctx.server,
        &actor(),
        &token,
        OtpVerifyRequest { otp: wrong.into() },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::OtpWrong));

    // The right code still works afterwards
    signing::otp_verify(&ctx.server, &actor(), &token, OtpVerifyRequest { otp: code })
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (_, token) = invite(&ctx, &document, "ana@client.test").await;

    signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    signing::otp_start(&ctx.server, &actor(), &token).await.unwrap();
    let code = delivered_code(&ctx, "ana@client.test").await;

    ctx.clock.advance(Duration::minutes(11));

    let err = signing::otp_verify(&ctx.server, &actor(), &token, OtpVerifyRequest { otp: code })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::OtpExpired));
}

#[tokio::test]
async fn operations_require_viewing_first() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (_, token) = invite(&ctx, &document, "ana@client.test").await;

    let err = signing::otp_start(&ctx.server, &actor(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let err = signing::commit(&ctx.server, &actor(), &token, commit_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn second_commit_is_terminal_and_chain_unchanged() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (signer, token) = invite(&ctx, &document, "ana@client.test").await;

    signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    signing::commit(&ctx.server, &actor(), &token, commit_request())
        .await
        .unwrap();
    let chain_len = ctx.server.store.list_chain(&signer.id.0).await.unwrap().len();

    let err = signing::commit(&ctx.server, &actor(), &token, commit_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AlreadyTerminal));
    assert_eq!(
        ctx.server.store.list_chain(&signer.id.0).await.unwrap().len(),
        chain_len
    );
}

#[tokio::test]
async fn commit_on_cancelled_document_is_terminal() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (signer, token) = invite(&ctx, &document, "ana@client.test").await;

    signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    documents::change_status(
        &ctx.server,
        &ctx.owner,
        &actor(),
        &document.id,
        DocumentStatus::Cancelled,
    )
    .await
    .unwrap();

    let err = signing::commit(&ctx.server, &actor(), &token, commit_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AlreadyTerminal));

    // No SIGNED entry appeared and every chain still verifies
    let events = ctx.server.store.list_chain(&signer.id.0).await.unwrap();
    assert!(!events.iter().any(|e| e.action == AuditAction::Signed));
    let verification = documents::verify_chains(&ctx.server, &ctx.owner, &document.id)
        .await
        .unwrap();
    assert!(verification.is_valid);
}

#[tokio::test]
async fn declined_signer_cannot_commit() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (signer, token) = invite(&ctx, &document, "ana@client.test").await;

    signing::summary(&ctx.server, &actor(), &token).await.unwrap();
    let declined = signing::decline(&ctx.server, &actor(), &token).await.unwrap();
    assert_eq!(declined.status, SignerStatus::Declined);

    let err = signing::commit(&ctx.server, &actor(), &token, commit_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AlreadyTerminal));

    let events = ctx.server.store.list_chain(&signer.id.0).await.unwrap();
    assert!(events.iter().any(|e| e.action == AuditAction::Declined));
}

#[tokio::test]
async fn garbage_tokens_are_rejected() {
    let ctx = test_context().await;
    let err = signing::summary(&ctx.server, &actor(), "not-a-real-token")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidToken));
}

#[tokio::test]
async fn share_tokens_expire_with_the_deadline() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", Some(test_start() + Duration::hours(1))).await;
    let (_, token) = invite(&ctx, &document, "ana@client.test").await;

    ctx.clock.advance(Duration::hours(2));

    let err = signing::summary(&ctx.server, &actor(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidToken));
}

#[tokio::test]
async fn commit_rejects_bad_images() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (_, token) = invite(&ctx, &document, "ana@client.test").await;
    signing::summary(&ctx.server, &actor(), &token).await.unwrap();

    let err = signing::commit(
        &ctx.server,
        &actor(),
        &token,
        CommitRequest {
            client_fingerprint: "fp".into(),
            signature_image_base64: "!!!not-base64!!!".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    use base64::Engine;
    let err = signing::commit(
        &ctx.server,
        &actor(),
        &token,
        CommitRequest {
            client_fingerprint: "fp".into(),
            signature_image_base64: base64::engine::general_purpose::STANDARD.encode(b"not a png"),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn position_bounds_are_validated() {
    let ctx = test_context().await;
    let document = upload(&ctx, "NDA", None).await;
    let (_, token) = invite(&ctx, &document, "ana@client.test").await;
    signing::summary(&ctx.server, &actor(), &token).await.unwrap();

    let err = signing::position(
        &ctx.server,
        &token,
        PositionRequest {
            page: 0,
            x: 10.0,
            y: 10.0,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let err = signing::position(
        &ctx.server,
        &token,
        PositionRequest {
            page: 1,
            x: -5.0,
            y: 10.0,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}
