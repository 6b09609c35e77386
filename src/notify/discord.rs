use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{JobFailedEvent, Notifier};

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    /// `None` when `DISCORD_WEBHOOK_URL` is unset or empty.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("DISCORD_WEBHOOK_URL").ok()?;
        if url.trim().is_empty() {
            return None;
        }
        Some(Self::new(url))
    }

    async fn post_with_retries(&self, payload: &DiscordWebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("Discord webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("Discord webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, ev: &JobFailedEvent) -> Result<()> {
        let title = format!("Data refresh failed: {}", ev.source_id);
        let description = format!(
            "**Job:** {}\n**Attempts:** {}\n**Error:** {}\n**Time (UTC):** {}",
            ev.job_id,
            ev.attempts,
            ev.last_error,
            ev.ts.to_rfc3339()
        );
        let payload = DiscordWebhookPayload::embed(&title, &description);
        self.post_with_retries(&payload).await
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(title: &str, description: &str) -> Self {
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: description.to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_payload_shape() {
        let p = DiscordWebhookPayload::embed("t", "d");
        let v = serde_json::to_value(&p).unwrap();
        assert!(v["content"].is_null());
        assert_eq!(v["embeds"][0]["title"], "t");
        assert_eq!(v["embeds"][0]["description"], "d");
    }
}
