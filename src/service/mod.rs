// src/service/mod.rs
//! `DataService`: one `get_data` contract over fetcher, cache and fallback.
//!
//! Lookup order for `get_data(id, force)`:
//! 1. fresh cache entry (skipped when `force`), no I/O
//! 2. live fetch; on success the cache entry is replaced
//! 3. stale cache entry, regardless of expiry
//! 4. compiled-in fallback payload
//! 5. `DataError::NoDataAvailable`
//!
//! Fetch-then-cache is not serialized per source: two callers racing on the
//! same expired source may both hit the fetcher.

pub mod cache;
pub mod fallback;
pub mod providers;
pub mod typed;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;

use crate::error::{DataError, DataResult};
use crate::sources::{DataSourceDescriptor, REGIONAL_PROPERTY_DATA};
use cache::{CacheEntry, CacheStore};
use fallback::FallbackCatalog;
use types::{DataOrigin, FetchedData, Fetcher};

pub struct DataService {
    sources: RwLock<HashMap<String, DataSourceDescriptor>>,
    cache: CacheStore,
    fallback: FallbackCatalog,
    fetcher: Arc<dyn Fetcher>,
}

impl DataService {
    pub fn new(
        catalog: Vec<DataSourceDescriptor>,
        fetcher: Arc<dyn Fetcher>,
        fallback: FallbackCatalog,
    ) -> Self {
        crate::metrics::ensure_metrics_described();
        let sources = catalog.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            sources: RwLock::new(sources),
            cache: CacheStore::new(),
            fallback,
            fetcher,
        }
    }

    pub fn fetcher_name(&self) -> &'static str {
        self.fetcher.name()
    }

    // ---- source catalog ----

    pub fn source(&self, source_id: &str) -> Option<DataSourceDescriptor> {
        let g = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        g.get(source_id).cloned()
    }

    /// All descriptors, sorted by id.
    pub fn sources(&self) -> Vec<DataSourceDescriptor> {
        let g = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut v: Vec<_> = g.values().cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        v
    }

    pub fn active_sources(&self) -> Vec<DataSourceDescriptor> {
        self.sources().into_iter().filter(|d| d.active).collect()
    }

    pub fn set_active(&self, source_id: &str, active: bool) -> DataResult<()> {
        let mut g = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let d = g
            .get_mut(source_id)
            .ok_or_else(|| DataError::UnknownSource(source_id.to_string()))?;
        d.active = active;
        Ok(())
    }

    /// Called by the scheduler after a successful refresh.
    pub fn mark_updated(&self, source_id: &str, ts: DateTime<Utc>) {
        let mut g = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(d) = g.get_mut(source_id) {
            d.last_updated = Some(ts);
        }
    }

    // ---- data access ----

    pub async fn get_data(&self, source_id: &str, force_refresh: bool) -> DataResult<Value> {
        self.get_data_at(source_id, force_refresh, Utc::now()).await
    }

    pub async fn get_data_at(
        &self,
        source_id: &str,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> DataResult<Value> {
        self.fetch_at(source_id, force_refresh, now)
            .await
            .map(|f| f.payload)
    }

    /// Like `get_data_at`, but tells the caller where the payload came from.
    pub async fn fetch_at(
        &self,
        source_id: &str,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> DataResult<FetchedData> {
        if !force_refresh {
            if let Some(entry) = self.cache.get_fresh(source_id, now) {
                counter!("data_cache_hits_total").increment(1);
                tracing::trace!(target: "data", source = source_id, "cache hit");
                return Ok(FetchedData {
                    payload: entry.payload,
                    origin: DataOrigin::Cache,
                    fetched_at: Some(entry.fetched_at),
                });
            }
        }

        match self.source(source_id) {
            Some(descriptor) if descriptor.active => {
                counter!("data_fetch_total").increment(1);
                match self.fetcher.fetch(&descriptor).await {
                    Ok(payload) => {
                        let entry = CacheEntry {
                            source_id: source_id.to_string(),
                            payload: payload.clone(),
                            fetched_at: now,
                            expires_at: descriptor.expiry_for(now),
                        };
                        self.cache.put(entry);
                        tracing::info!(
                            target: "data",
                            source = source_id,
                            fetcher = self.fetcher.name(),
                            "refreshed from origin"
                        );
                        return Ok(FetchedData {
                            payload,
                            origin: DataOrigin::Live,
                            fetched_at: Some(now),
                        });
                    }
                    Err(e) => {
                        counter!("data_fetch_errors_total").increment(1);
                        tracing::warn!(target: "data", error = ?e, source = source_id, "fetch failed");
                    }
                }
            }
            Some(_) => {
                tracing::debug!(target: "data", source = source_id, "source inactive, fetch skipped");
            }
            None => {
                tracing::warn!(target: "data", source = source_id, "unknown source, fetch skipped");
            }
        }

        self.degraded(source_id)
    }

    fn degraded(&self, source_id: &str) -> DataResult<FetchedData> {
        if let Some(entry) = self.cache.get(source_id) {
            counter!("data_stale_served_total").increment(1);
            tracing::warn!(
                target: "data",
                source = source_id,
                fetched_at = %entry.fetched_at,
                "serving stale cache"
            );
            return Ok(FetchedData {
                payload: entry.payload,
                origin: DataOrigin::StaleCache,
                fetched_at: Some(entry.fetched_at),
            });
        }
        if let Some(payload) = self.fallback.get(source_id) {
            counter!("data_fallback_served_total").increment(1);
            tracing::warn!(target: "data", source = source_id, "serving fallback payload");
            return Ok(FetchedData {
                payload: payload.clone(),
                origin: DataOrigin::Fallback,
                fetched_at: None,
            });
        }
        tracing::error!(target: "data", source = source_id, "no cache and no fallback");
        Err(DataError::NoDataAvailable(source_id.to_string()))
    }

    /// `payload[category][region]`, then `payload[category]["default"]`.
    /// A missing category yields 0.
    pub async fn get_regional_data(&self, category: &str, region: &str) -> DataResult<f64> {
        let payload = self.get_data(REGIONAL_PROPERTY_DATA, false).await?;
        Ok(regional_lookup(&payload, category, region))
    }

    // ---- cache maintenance ----

    pub fn cache_entry(&self, source_id: &str) -> Option<CacheEntry> {
        self.cache.get(source_id)
    }

    /// True when there is no cache entry or it expired at `now`.
    pub fn is_stale_at(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        self.cache.get_fresh(source_id, now).is_none()
    }

    pub fn invalidate(&self, source_id: &str) -> bool {
        self.cache.remove(source_id).is_some()
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let n = self.cache.sweep_expired(now);
        if n > 0 {
            tracing::debug!(target: "data", removed = n, "swept expired cache entries");
        }
        n
    }

    pub fn cached_sources(&self) -> usize {
        self.cache.len()
    }
}

pub(crate) fn regional_lookup(payload: &Value, category: &str, region: &str) -> f64 {
    let Some(cat) = payload.get(category) else {
        tracing::warn!(target: "data", category, region, "regional category missing, returning 0");
        return 0.0;
    };
    cat.get(region)
        .and_then(Value::as_f64)
        .or_else(|| cat.get("default").and_then(Value::as_f64))
        .unwrap_or(0.0)
}
