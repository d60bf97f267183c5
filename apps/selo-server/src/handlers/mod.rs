//! Handler modules for the HTTP service, organized by surface:
//! - documents: owner/admin operations (upload, invite, status, audit, verify)
//! - signing: signer-facing state machine behind share tokens
//! - validate: public provenance check

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::server::SeloServer;

pub mod documents;
pub mod signing;
pub mod validate;

/// Uploads are multipart PDFs; allow more than the default body size.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub fn router(server: Arc<SeloServer>) -> Router {
    Router::new()
        .route("/documents", post(documents::create_route))
        .route("/documents/validate-file", post(validate::validate_route))
        .route("/documents/{id}", get(documents::get_route))
        .route("/documents/{id}/invite", post(documents::invite_route))
        .route("/documents/{id}/cancel", post(documents::cancel_route))
        .route("/documents/{id}/expire", post(documents::expire_route))
        .route("/documents/{id}/finalize", post(documents::refinalize_route))
        .route("/documents/{id}/audit", get(documents::audit_route))
        .route(
            "/documents/{id}/verify-chain",
            get(documents::verify_chain_route),
        )
        .route("/sign/{token}", get(signing::summary_route))
        .route("/sign/{token}/document", get(signing::download_route))
        .route("/sign/{token}/identify", post(signing::identify_route))
        .route("/sign/{token}/otp/start", post(signing::otp_start_route))
        .route("/sign/{token}/otp/verify", post(signing::otp_verify_route))
        .route("/sign/{token}/position", post(signing::position_route))
        .route("/sign/{token}/commit", post(signing::commit_route))
        .route("/sign/{token}/decline", post(signing::decline_route))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn healthz() -> &'static str {
    "ok"
}
