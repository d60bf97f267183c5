//! Stand-in notification transport.
//!
//! Real delivery (email, WhatsApp) belongs to an external provider; this
//! transport records intent in the logs without ever writing the token, the
//! code or the full recipient address anywhere.

use async_trait::async_trait;

use selo_crypto::{mask_email, mask_phone};
use selo_notify::{Notification, Notifier, NotifyError};

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let recipient = notification.recipient();
        let masked = if recipient.contains('@') {
            mask_email(recipient)
        } else {
            mask_phone(recipient)
        };
        tracing::info!(
            kind = notification.kind(),
            recipient = %masked,
            "notification ready; no delivery transport configured"
        );
        Ok(())
    }
}
