//! Daily deadline sweep.
//!
//! One background task: documents past their deadline are expired as
//! `SYSTEM`, documents approaching it trigger reminder notifications for the
//! signers that have not settled yet. Fire-and-forget; every tick re-scans,
//! so a missed tick loses nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::time::MissedTickBehavior;

use selo_audit::{ActorKind, AuditAction, AuditDraft, EntityType};
use selo_notify::Notification;
use selo_storage::{DocumentStatus, Store, StoreError};

use crate::server::{ApiError, SeloServer};

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const REMINDER_WINDOW_DAYS: i64 = 2;

pub fn spawn(server: Arc<SeloServer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = run_sweep(&server).await {
                tracing::error!(error = %err, "deadline sweep failed");
            }
        }
    })
}

/// One pass: expire what is overdue, remind what is close.
pub async fn run_sweep(server: &SeloServer) -> Result<(), ApiError> {
    let now = server.clock.now();
    let horizon = now + ChronoDuration::days(REMINDER_WINDOW_DAYS);
    let candidates = server.store.list_deadline_candidates(horizon).await?;

    for document in candidates {
        let Some(deadline) = document.deadline_at else {
            continue;
        };

        if deadline <= now {
            let audit = AuditDraft::new(
                document.tenant_id.0,
                ActorKind::System,
                EntityType::Document,
                document.id.0,
                AuditAction::StatusChanged,
            )
            .client("", "deadline-sweep")
            .payload(serde_json::json!({
                "newStatus": DocumentStatus::Expired.to_string(),
            }));

            match server
                .store
                .update_document_status(&document.id, DocumentStatus::Expired, audit)
                .await
            {
                Ok(_) => {
                    tracing::info!(document_id = %document.id, "expired document past deadline")
                }
                // Lost a race against another transition; nothing to do.
                Err(StoreError::Terminal) => {}
                Err(err) => {
                    tracing::warn!(document_id = %document.id, error = %err, "expiry failed")
                }
            }
            continue;
        }

        for signer in server
            .store
            .list_signers(&document.id)
            .await?
            .iter()
            .filter(|signer| !signer.status.is_terminal())
        {
            server.notify_detached(
                document.tenant_id.0,
                EntityType::Signer,
                signer.id.0,
                Notification::DeadlineReminder {
                    recipient: signer.email.clone(),
                    document_title: document.title.clone(),
                    deadline: deadline.to_rfc3339(),
                },
            );
        }
    }

    Ok(())
}
