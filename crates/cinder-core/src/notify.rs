//! Build status notification.

use async_trait::async_trait;

use crate::Build;

/// Reports build status changes to an external service.
///
/// Called when a run starts and again when it ends. Implementations must
/// not fail the build: delivery problems are theirs to log.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn send_status(&self, build: &Build);
}

/// Notifier that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl StatusNotifier for NoopNotifier {
    async fn send_status(&self, _build: &Build) {}
}
