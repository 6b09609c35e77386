// src/service/providers/fixture.rs
use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::service::fallback::FallbackCatalog;
use crate::service::types::Fetcher;
use crate::sources::DataSourceDescriptor;

/// Serves fixed payloads. Used for local runs without network access.
pub struct FixtureFetcher {
    payloads: HashMap<String, Value>,
}

impl FixtureFetcher {
    /// Serve the compiled-in fallback payloads as if they were live.
    pub fn from_fallback(catalog: &FallbackCatalog) -> Self {
        let payloads = catalog
            .source_ids()
            .filter_map(|id| catalog.get(id).map(|v| (id.to_string(), v.clone())))
            .collect();
        Self { payloads }
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(&self, source: &DataSourceDescriptor) -> Result<Value> {
        self.payloads
            .get(&source.id)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture for source `{}`", source.id))
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
