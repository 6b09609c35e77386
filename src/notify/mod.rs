//! Notifications for jobs that exhausted their retries.

pub mod discord;
pub mod slack;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailedEvent {
    pub job_id: String,
    pub source_id: String,
    pub attempts: u32,
    pub last_error: String,
    pub ts: DateTime<Utc>,
}

impl JobFailedEvent {
    pub fn summary(&self) -> String {
        format!(
            "Data refresh for `{}` failed after {} attempt(s): {}",
            self.source_id, self.attempts, self.last_error
        )
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ev: &JobFailedEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Always-on notifier: writes the failure to the log.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, ev: &JobFailedEvent) -> Result<()> {
        tracing::error!(
            target: "notify",
            job = %ev.job_id,
            source = %ev.source_id,
            attempts = ev.attempts,
            error = %ev.last_error,
            "data refresh job failed permanently"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Fans an event out to every configured notifier. Individual failures are
/// logged and never propagated.
pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Log notifier plus Slack/Discord when their webhook env vars are set.
    pub fn from_env() -> Self {
        let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        if let Some(slack) = slack::SlackNotifier::from_env() {
            notifiers.push(Box::new(slack));
        }
        if let Some(discord) = discord::DiscordNotifier::from_env() {
            notifiers.push(Box::new(discord));
        }
        Self { notifiers }
    }

    pub async fn notify(&self, ev: &JobFailedEvent) {
        for n in &self.notifiers {
            if let Err(e) = n.send(ev).await {
                tracing::warn!(target: "notify", notifier = n.name(), error = ?e, "notification failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for NotifierMux {
    async fn send(&self, ev: &JobFailedEvent) -> Result<()> {
        self.notify(ev).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mux"
    }
}
