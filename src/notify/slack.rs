use anyhow::{Context, Result};
use reqwest::Client;

use super::{JobFailedEvent, Notifier};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    /// `None` when `SLACK_WEBHOOK_URL` is unset or empty.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SLACK_WEBHOOK_URL").ok()?;
        if url.trim().is_empty() {
            return None;
        }
        Some(Self::new(url))
    }

    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, ev: &JobFailedEvent) -> Result<()> {
        let text = format!(
            "*Data refresh failed:* `{}` (job {})\nAttempts: {}\nError: {}\n@ {}",
            ev.source_id,
            ev.job_id,
            ev.attempts,
            ev.last_error,
            ev.ts.to_rfc3339()
        );
        let body = serde_json::json!({ "text": text });

        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}
