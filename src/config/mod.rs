// src/config/mod.rs
//! Service configuration.
//!
//! Resolution order:
//! 1) `$HUB_CONFIG_PATH` (must exist)
//! 2) `config/hub.toml`
//! 3) `config/hub.json`
//! 4) built-in defaults
//!
//! Env overrides are applied on top, then values are sanitized.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "HUB_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub scheduler: SchedulerConfig,
    pub versions: VersionsConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub health_interval_secs: u64,
    pub max_concurrent_jobs: usize,
    pub max_attempts: u32,
    /// Fixed delay between attempts; there is no exponential backoff.
    pub retry_delay_secs: u64,
    pub stuck_threshold_secs: u64,
    pub job_retention_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            health_interval_secs: 300,
            max_concurrent_jobs: 3,
            max_attempts: 3,
            retry_delay_secs: 300,
            stuck_threshold_secs: 1800,
            job_retention_hours: 168,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }

    pub fn health_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.health_interval_secs)
    }

    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_delay_secs as i64)
    }

    pub fn stuck_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stuck_threshold_secs as i64)
    }

    pub fn job_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.job_retention_hours as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionsConfig {
    pub max_versions_per_source: usize,
    /// Versions and calculation records older than this are pruned by the
    /// health sweep. `None` disables ledger pruning.
    pub retention_days: Option<i64>,
    /// JSON snapshot of the ledger; loaded at startup, written by the health sweep.
    pub ledger_path: Option<PathBuf>,
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            max_versions_per_source: crate::versioning::DEFAULT_MAX_VERSIONS_PER_SOURCE,
            retention_days: Some(365),
            ledger_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Http,
    Fixture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub mode: FetchMode,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Fixture,
            base_url: None,
            timeout_secs: 10,
            user_agent: None,
        }
    }
}

impl HubConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading hub config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing hub config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// File lookup (see module docs) + env overrides.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new("config/hub.toml").exists() {
            Self::load_from(Path::new("config/hub.toml"))?
        } else if Path::new("config/hub.json").exists() {
            Self::load_from(Path::new("config/hub.json"))?
        } else {
            Self::default()
        };
        Ok(base.with_env_overrides().sanitized())
    }

    pub fn with_env_overrides(mut self) -> Self {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = env_parse("SCHEDULER_MAX_CONCURRENT_JOBS") {
            self.scheduler.max_concurrent_jobs = v;
        }
        if let Some(v) = env_parse("SCHEDULER_MAX_ATTEMPTS") {
            self.scheduler.max_attempts = v;
        }
        if let Some(v) = env_parse("SCHEDULER_RETRY_DELAY_SECS") {
            self.scheduler.retry_delay_secs = v;
        }
        if let Some(v) = env_parse("SCHEDULER_TICK_SECS") {
            self.scheduler.tick_interval_secs = v;
        }
        if let Ok(mode) = std::env::var("DATA_FETCH_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "http" => self.fetch.mode = FetchMode::Http,
                "fixture" => self.fetch.mode = FetchMode::Fixture,
                other => tracing::warn!(mode = other, "ignoring unknown DATA_FETCH_MODE"),
            }
        }
        if let Ok(url) = std::env::var("DATA_BASE_URL") {
            if !url.trim().is_empty() {
                self.fetch.base_url = Some(url.trim().to_string());
            }
        }
        if let Ok(p) = std::env::var("LEDGER_PATH") {
            if !p.trim().is_empty() {
                self.versions.ledger_path = Some(PathBuf::from(p.trim()));
            }
        }
        self
    }

    /// Clamp values that would stall or break the services.
    pub fn sanitized(mut self) -> Self {
        let s = &mut self.scheduler;
        s.max_concurrent_jobs = s.max_concurrent_jobs.max(1);
        s.max_attempts = s.max_attempts.max(1);
        s.tick_interval_secs = s.tick_interval_secs.max(1);
        s.health_interval_secs = s.health_interval_secs.max(1);
        s.stuck_threshold_secs = s.stuck_threshold_secs.max(1);
        self.versions.max_versions_per_source = self.versions.max_versions_per_source.max(1);
        self.fetch.timeout_secs = self.fetch.timeout_secs.max(1);
        self
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<HubConfig> {
    // Try TOML first if hinted or content does not look like JSON.
    let try_toml = hint_ext == "toml" || !s.trim_start().starts_with('{');
    if try_toml {
        if let Ok(v) = toml::from_str::<HubConfig>(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str::<HubConfig>(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = toml::from_str::<HubConfig>(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported hub config format"))
}
