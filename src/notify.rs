use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::sync::CycleSummary;

/// Something told about every finished cycle
#[async_trait]
pub trait CycleNotifier: Send + Sync {
    /// Deliver the summary. Failures are handled by the notifier itself.
    async fn notify(&self, summary: &CycleSummary);
}

/// Posts cycle summaries to a chat webhook as a Slack-style attachment
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn send(&self, summary: &CycleSummary) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .json(&webhook_payload(summary))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl CycleNotifier for WebhookNotifier {
    async fn notify(&self, summary: &CycleSummary) {
        match self.send(summary).await {
            Ok(()) => debug!("Posted cycle summary to webhook"),
            Err(e) => warn!(error = %e, "Failed to post cycle summary"),
        }
    }
}

/// Message body for a finished cycle
pub fn webhook_payload(summary: &CycleSummary) -> Value {
    json!({
        "parse": "none",
        "attachments": [{
            "title": "Update complete",
            "fields": [
                { "value": format!("Episodes added: {}", summary.added) },
                { "value": format!("Episodes downloaded: {}", summary.downloaded) },
                { "value": format!("Episodes removed: {}", summary.removed) },
            ],
            "color": "good",
            "mrkdwn_in": ["text", "fallback", "fields"],
        }],
    })
}
