//! Notification bus seam.

use async_trait::async_trait;

/// A human-facing notification: update available, update applied, rollback
/// fired, etc. The concrete wording is the caller's responsibility; this
/// crate only carries enough structure to decide dedup.
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Implemented by whatever wires up webhooks, push services, etc. Delivery
/// failure must not fail the caller's lifecycle step; callers only use the
/// `Result` to decide whether to update `NotifyState.last_notified`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// No-op notifier for tests and for the default binary configuration.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}
