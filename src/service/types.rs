// src/service/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sources::DataSourceDescriptor;

/// Retrieves a fresh payload for one source. Network I/O lives only here.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &DataSourceDescriptor) -> Result<Value>;
    fn name(&self) -> &'static str;
}

/// Where a payload returned by `DataService` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    /// Fresh cache entry, no I/O.
    Cache,
    /// Just fetched from the origin.
    Live,
    /// Fetch failed; served an expired cache entry.
    StaleCache,
    /// Fetch failed and nothing cached; served the compiled-in payload.
    Fallback,
}

impl DataOrigin {
    pub fn is_degraded(self) -> bool {
        matches!(self, DataOrigin::StaleCache | DataOrigin::Fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchedData {
    pub payload: Value,
    pub origin: DataOrigin,
    /// Fetch time of the served payload; `None` for the fallback catalog.
    pub fetched_at: Option<DateTime<Utc>>,
}
