//! Webhook status notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinder_core::{Build, StatusNotifier};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Payload posted on every status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub id: i64,
    pub project_id: i64,
    pub status: String,
    pub branch: String,
    pub commit: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Build> for StatusPayload {
    fn from(build: &Build) -> Self {
        Self {
            id: build.id.get(),
            project_id: build.project_id.get(),
            status: build.status.as_str().to_string(),
            branch: build.branch.clone(),
            commit: build.commit_id.clone(),
            started_at: build.started_at,
            finished_at: build.finished_at,
        }
    }
}

/// Posts build status as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusNotifier for WebhookNotifier {
    async fn send_status(&self, build: &Build) {
        let payload = StatusPayload::from(build);
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(build_id = %build.id, status = %build.status, "Status delivered");
            }
            Ok(response) => {
                warn!(
                    build_id = %build.id,
                    http_status = %response.status(),
                    "Status webhook rejected update"
                );
            }
            Err(e) => {
                warn!(build_id = %build.id, error = %e, "Failed to deliver status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{BuildId, BuildStatus, ProjectId};

    #[test]
    fn test_payload_from_build() {
        let mut build = Build::new(BuildId::new(12), ProjectId::new(3), "/srv/repo", "main");
        build.commit_id = Some("abc123".to_string());
        build.start(Utc::now()).unwrap();

        let payload = StatusPayload::from(&build);
        assert_eq!(payload.id, 12);
        assert_eq!(payload.project_id, 3);
        assert_eq!(payload.status, BuildStatus::Running.as_str());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["commit"], "abc123");
        assert!(json["finished_at"].is_null());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_fail() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/status");
        let build = Build::new(BuildId::new(1), ProjectId::new(1), "/srv/repo", "main");
        notifier.send_status(&build).await;
    }
}
