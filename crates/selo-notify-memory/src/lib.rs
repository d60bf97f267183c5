//! In-memory notifier.
//!
//! Records every notification instead of delivering it. Tests read the buffer
//! to observe cleartext invite tokens and one-time codes (the only sanctioned
//! way to see them); single-node dev deployments use it as a stand-in
//! transport. Can be armed to fail for exercising the best-effort contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use selo_notify::{Notification, Notifier, NotifyError};

/// Notifier that appends to an in-process buffer.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Notifications of one kind tag.
    pub fn sent_of_kind(&self, kind: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind() == kind)
            .cloned()
            .collect()
    }

    /// Make every subsequent send fail (simulated transport outage).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("memory notifier set to fail".into()));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selo_storage::AuthChannel;

    fn otp(code: &str) -> Notification {
        Notification::OtpCode {
            channel: AuthChannel::Email,
            recipient: "a@b.com".into(),
            code: code.into(),
        }
    }

    #[tokio::test]
    async fn test_records_in_order() {
        let notifier = MemoryNotifier::new();
        notifier.send(otp("111111")).await.unwrap();
        notifier.send(otp("222222")).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], otp("111111"));
        assert_eq!(sent[1], otp("222222"));
    }

    #[tokio::test]
    async fn test_filter_by_kind() {
        let notifier = MemoryNotifier::new();
        notifier.send(otp("111111")).await.unwrap();
        notifier
            .send(Notification::DocumentCompleted {
                recipient: "a@b.com".into(),
                document_title: "NDA".into(),
                short_code: None,
            })
            .await
            .unwrap();

        assert_eq!(notifier.sent_of_kind("otp_code").len(), 1);
        assert_eq!(notifier.sent_of_kind("document_completed").len(), 1);
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let notifier = MemoryNotifier::new();
        notifier.set_failing(true);
        assert!(notifier.send(otp("111111")).await.is_err());
        assert!(notifier.sent().is_empty());

        notifier.set_failing(false);
        assert!(notifier.send(otp("111111")).await.is_ok());
    }
}
