// src/service/providers/http.rs
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use serde_json::Value;

use crate::service::types::Fetcher;
use crate::sources::DataSourceDescriptor;

const DEFAULT_USER_AGENT: &str = "calc-data-hub/0.1";

/// JSON-over-HTTP fetcher. Origins that are absolute URLs are used as-is,
/// relative ones are joined onto `base_url`.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpFetcher {
    pub fn new(base_url: Option<String>, timeout_secs: u64, user_agent: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .connect_timeout(Duration::from_secs(timeout_secs.clamp(1, 4)))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    pub fn resolve_url(&self, origin: &str) -> Result<String> {
        if origin.starts_with("http://") || origin.starts_with("https://") {
            return Ok(origin.to_string());
        }
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("relative origin `{origin}` but no base_url configured"))?;
        Ok(format!("{}/{}", base, origin.trim_start_matches('/')))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &DataSourceDescriptor) -> Result<Value> {
        let url = self.resolve_url(&source.origin)?;
        let t0 = std::time::Instant::now();

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("non-2xx from {url}"))?;
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("decoding json from {url}"))?;

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("data_fetch_ms").record(ms);
        tracing::debug!(target: "data", source = %source.id, %url, ms, "http fetch ok");

        if body.is_null() {
            anyhow::bail!("{url} returned null body");
        }
        Ok(body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
