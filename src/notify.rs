//! Alert aggregation and push notification dispatch.
//!
//! All issues of one cycle are flattened into a single [`AlertBatch`] and sent
//! as one message, one issue per line. There is never more than one
//! notification per cycle.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

use crate::config::{NtfyConfig, NtfyPriority};
use crate::error::{AppError, Result};
use crate::evaluate::Issue;

/// Outbound notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Issues of one cycle, in device registration order then rule order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertBatch {
    issues: Vec<Issue>,
}

impl AlertBatch {
    pub fn from_device_issues(per_device_issues: Vec<Vec<Issue>>) -> Self {
        Self {
            issues: per_device_issues.into_iter().flatten().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Multi-line message body, `None` when there is nothing to report.
    pub fn message(&self) -> Option<String> {
        if self.issues.is_empty() {
            return None;
        }
        let lines: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        Some(lines.join("\n"))
    }
}

/// Sends one notification when any device reported an issue. Returns whether a
/// notification went out; a failed dispatch is logged and reported as `false`.
pub async fn aggregate_and_notify(
    per_device_issues: Vec<Vec<Issue>>,
    notifier: &dyn Notifier,
) -> bool {
    let batch = AlertBatch::from_device_issues(per_device_issues);
    let Some(message) = batch.message() else {
        return false;
    };

    info!(issues = batch.issues().len(), "sending alert:\n{}", message);
    match notifier.send(&message).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "failed to send alert notification");
            false
        }
    }
}

#[derive(Debug, Serialize)]
struct NtfyMessage<'a> {
    topic: &'a str,
    message: &'a str,
    title: &'a str,
    priority: u8,
    #[serde(skip_serializing_if = "no_tags")]
    tags: &'a [String],
}

fn no_tags(tags: &&[String]) -> bool {
    tags.is_empty()
}

/// ntfy publisher using the JSON publishing API, which keeps UTF-8 titles
/// intact.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    client: Client,
    base_url: String,
    topic: String,
    title: String,
    priority: NtfyPriority,
    tags: Vec<String>,
}

impl NtfyNotifier {
    pub fn new(cfg: &NtfyConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Notify(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            topic: cfg.topic.clone(),
            title: cfg.title.clone(),
            priority: cfg.priority,
            tags: cfg.tags.clone(),
        })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let body = NtfyMessage {
            topic: &self.topic,
            message,
            title: &self.title,
            priority: self.priority.as_number(),
            tags: &self.tags,
        };

        let response = self.client.post(&self.base_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Notify(format!("ntfy returned {}: {}", status, text)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::IssueKind;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) -> Result<()> {
            self.sent.lock().unwrap().push(message.to_string());
            if self.fail {
                return Err(AppError::Notify("unreachable".into()));
            }
            Ok(())
        }
    }

    fn issue(device: &str, kind: IssueKind, detail: &str) -> Issue {
        Issue {
            device_name: device.into(),
            kind,
            detail: detail.into(),
        }
    }

    fn ntfy_config(base_url: String) -> NtfyConfig {
        NtfyConfig {
            base_url,
            topic: "bathhouse_alerts".into(),
            title: "Ice Bath Alert 🧊".into(),
            priority: NtfyPriority::High,
            tags: vec!["ice_cube".into()],
        }
    }

    #[test]
    fn test_batch_preserves_device_then_rule_order() {
        let batch = AlertBatch::from_device_issues(vec![
            vec![
                issue("Downstairs", IssueKind::LowFlow, "Low Flow (12.5L)"),
                issue("Downstairs", IssueKind::HighTemp, "High Temp (14.0°C)"),
            ],
            vec![],
            vec![Issue::connection_error("Upstairs")],
        ]);

        assert_eq!(
            batch.message().unwrap(),
            "Downstairs: Low Flow (12.5L)\nDownstairs: High Temp (14.0°C)\nUpstairs: Connection Error ❌"
        );
    }

    #[test]
    fn test_empty_batch_has_no_message() {
        let batch = AlertBatch::from_device_issues(vec![vec![], vec![]]);
        assert!(batch.is_empty());
        assert_eq!(batch.message(), None);
    }

    #[tokio::test]
    async fn test_aggregate_sends_once() {
        let notifier = RecordingNotifier::default();
        let sent = aggregate_and_notify(
            vec![
                vec![issue("A", IssueKind::NoFlow, "No Flow (Pump Off?)")],
                vec![Issue::connection_error("B")],
            ],
            &notifier,
        )
        .await;

        assert!(sent);
        let messages = notifier.sent.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], "A: No Flow (Pump Off?)\nB: Connection Error ❌");
    }

    #[tokio::test]
    async fn test_aggregate_without_issues_does_not_send() {
        let notifier = RecordingNotifier::default();
        let sent = aggregate_and_notify(vec![vec![], vec![]], &notifier).await;

        assert!(!sent);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_reports_dispatch_failure() {
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let sent = aggregate_and_notify(vec![vec![Issue::connection_error("A")]], &notifier).await;

        assert!(!sent);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ntfy_publishes_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::Json(json!({
                "topic": "bathhouse_alerts",
                "message": "A: Connection Error ❌",
                "title": "Ice Bath Alert 🧊",
                "priority": 4,
                "tags": ["ice_cube"]
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = NtfyNotifier::new(&ntfy_config(server.url())).unwrap();
        notifier.send("A: Connection Error ❌").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ntfy_error_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let notifier = NtfyNotifier::new(&ntfy_config(server.url())).unwrap();
        let result = notifier.send("hello").await;

        assert!(matches!(result, Err(AppError::Notify(_))));
        mock.assert_async().await;
    }
}
