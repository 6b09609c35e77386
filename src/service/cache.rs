// src/service/cache.rs
//! Per-source working set of `DataService`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub source_id: String,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Entries are replaced wholesale; there is no partial update path.
#[derive(Debug, Default)]
pub struct CacheStore {
    inner: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source_id: &str) -> Option<CacheEntry> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        g.get(source_id).cloned()
    }

    /// Returns the entry only if still fresh at `now`.
    pub fn get_fresh(&self, source_id: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.get(source_id).filter(|e| !e.is_expired_at(now))
    }

    pub fn put(&self, entry: CacheEntry) {
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        g.insert(entry.source_id.clone(), entry);
    }

    pub fn remove(&self, source_id: &str) -> Option<CacheEntry> {
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        g.remove(source_id)
    }

    /// Drops every entry expired at `now`. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = g.len();
        g.retain(|_, e| !e.is_expired_at(now));
        before - g.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn entry(id: &str, fetched: DateTime<Utc>, hours: i64) -> CacheEntry {
        CacheEntry {
            source_id: id.into(),
            payload: json!({ "id": id }),
            fetched_at: fetched,
            expires_at: fetched + Duration::hours(hours),
        }
    }

    #[test]
    fn fresh_lookup_respects_expiry() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let c = CacheStore::new();
        c.put(entry("a", t0, 24));
        assert!(c.get_fresh("a", t0 + Duration::hours(23)).is_some());
        assert!(c.get_fresh("a", t0 + Duration::hours(24)).is_none());
        // stale entry is still retrievable for fallback
        assert!(c.get("a").is_some());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let c = CacheStore::new();
        c.put(entry("daily", t0, 24));
        c.put(entry("weekly", t0, 168));
        let removed = c.sweep_expired(t0 + Duration::hours(48));
        assert_eq!(removed, 1);
        assert!(c.get("daily").is_none());
        assert!(c.get("weekly").is_some());
    }
}
