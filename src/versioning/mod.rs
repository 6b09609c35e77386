// src/versioning/mod.rs
//! Provenance ledger: immutable, content-deduplicated snapshots per source and
//! a record of which snapshot each calculator run consulted.
//!
//! Invariants:
//! - consecutive versions of a source never share a checksum
//! - a source's versions are ordered by non-decreasing timestamp
//! - at most `max_versions_per_source` versions are kept (oldest evicted first)
//!
//! Pruning via `cleanup` can make an old calculation unreproducible. That is
//! reported through `Reproduction::is_reproducible`, not as an error.

pub mod checksum;
pub mod diff;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DataError, DataResult};
use checksum::content_checksum;
use diff::{diff_values, FieldChange};

pub const DEFAULT_MAX_VERSIONS_PER_SOURCE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateReason {
    Initial,
    Scheduled,
    Manual,
    Correction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    /// Where the payload came from (fetcher name, URL, operator...).
    pub origin: String,
    pub reason: UpdateReason,
    #[serde(default)]
    pub validated_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl VersionMetadata {
    pub fn new(origin: &str, reason: UpdateReason) -> Self {
        Self {
            origin: origin.to_string(),
            reason,
            validated_by: None,
            notes: None,
        }
    }

    pub fn validated_by(mut self, who: &str) -> Self {
        self.validated_by = Some(who.to_string());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataVersion {
    pub id: String,
    pub source_id: String,
    pub sequence: u64,
    /// Human label, `v{sequence}`.
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub checksum: String,
    pub metadata: VersionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub id: String,
    pub calculator_id: String,
    pub timestamp: DateTime<Utc>,
    pub inputs: Value,
    pub outputs: Value,
    /// source id -> version id actually consulted
    pub source_versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDrift {
    pub source_id: String,
    pub used_version: String,
    pub latest_version: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reproduction {
    pub calculation_id: String,
    pub original_outputs: Value,
    pub versions_used: BTreeMap<String, DataVersion>,
    /// (source id, version id) pairs that no longer resolve.
    pub missing_versions: Vec<(String, String)>,
    pub is_reproducible: bool,
    /// Sources whose data moved on since the calculation ran.
    pub diffs: Vec<SourceDrift>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub versions_removed: usize,
    pub calculations_removed: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    versions: HashMap<String, Vec<DataVersion>>,
    /// Last sequence handed out per source; survives eviction.
    sequences: HashMap<String, u64>,
    calculations: HashMap<String, CalculationRecord>,
    next_calculation: u64,
}

impl Ledger {
    fn find(&self, source_id: &str, version_id: &str) -> Option<&DataVersion> {
        self.versions
            .get(source_id)?
            .iter()
            .find(|v| v.id == version_id)
    }
}

pub struct VersionStore {
    max_versions: usize,
    inner: RwLock<Ledger>,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VERSIONS_PER_SOURCE)
    }
}

impl VersionStore {
    pub fn new(max_versions_per_source: usize) -> Self {
        crate::metrics::ensure_metrics_described();
        Self {
            max_versions: max_versions_per_source.max(1),
            inner: RwLock::new(Ledger::default()),
        }
    }

    pub fn max_versions_per_source(&self) -> usize {
        self.max_versions
    }

    // ---- versions ----

    pub fn store_version(&self, source_id: &str, payload: &Value, metadata: VersionMetadata) -> String {
        self.store_version_at(source_id, payload, metadata, Utc::now())
    }

    /// Appends a new version unless `payload` matches the latest one, in which
    /// case the latest id is returned unchanged.
    pub fn store_version_at(
        &self,
        source_id: &str,
        payload: &Value,
        metadata: VersionMetadata,
        now: DateTime<Utc>,
    ) -> String {
        let checksum = content_checksum(payload);
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let last_ts = match g.versions.get(source_id).and_then(|l| l.last()) {
            Some(last) if last.checksum == checksum => {
                counter!("versions_dedup_total").increment(1);
                tracing::debug!(target: "versions", source = source_id, id = %last.id, "content unchanged");
                return last.id.clone();
            }
            Some(last) => Some(last.timestamp),
            None => None,
        };

        let seq = {
            let s = g.sequences.entry(source_id.to_string()).or_insert(0);
            *s += 1;
            *s
        };
        // keep storage order timestamp-monotonic even if the wall clock steps back
        let timestamp = last_ts.map_or(now, |t| t.max(now));
        let id = format!("{source_id}:v{seq}");

        let version = DataVersion {
            id: id.clone(),
            source_id: source_id.to_string(),
            sequence: seq,
            label: format!("v{seq}"),
            timestamp,
            payload: payload.clone(),
            checksum,
            metadata,
        };

        let list = g.versions.entry(source_id.to_string()).or_default();
        list.push(version);
        if list.len() > self.max_versions {
            let excess = list.len() - self.max_versions;
            list.drain(0..excess);
            tracing::debug!(target: "versions", source = source_id, evicted = excess, "version cap reached");
        }

        counter!("versions_stored_total").increment(1);
        tracing::info!(target: "versions", source = source_id, %id, "stored new version");
        id
    }

    /// Latest version when `version_id` is `None`.
    pub fn get_version(&self, source_id: &str, version_id: Option<&str>) -> Option<DataVersion> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let list = g.versions.get(source_id)?;
        match version_id {
            None => list.last().cloned(),
            Some(id) => list.iter().find(|v| v.id == id).cloned(),
        }
    }

    /// Latest version with `timestamp <= at`.
    pub fn get_as_of(&self, source_id: &str, at: DateTime<Utc>) -> Option<DataVersion> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let list = g.versions.get(source_id)?;
        let mut found = None;
        for v in list {
            if v.timestamp <= at {
                found = Some(v);
            } else {
                break;
            }
        }
        found.cloned()
    }

    /// All retained versions, oldest first.
    pub fn list_versions(&self, source_id: &str) -> Vec<DataVersion> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        g.versions.get(source_id).cloned().unwrap_or_default()
    }

    pub fn version_count(&self, source_id: &str) -> usize {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        g.versions.get(source_id).map_or(0, Vec::len)
    }

    pub fn sources(&self) -> Vec<String> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut v: Vec<String> = g.versions.keys().cloned().collect();
        v.sort();
        v
    }

    /// `None` if either version is unknown.
    pub fn compare_versions(
        &self,
        source_id: &str,
        version_a: &str,
        version_b: &str,
    ) -> Option<Vec<FieldChange>> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let a = g.find(source_id, version_a)?;
        let b = g.find(source_id, version_b)?;
        Some(diff_values(&a.payload, &b.payload))
    }

    // ---- calculations ----

    pub fn record_calculation(
        &self,
        calculator_id: &str,
        inputs: &Value,
        outputs: &Value,
        source_versions: BTreeMap<String, String>,
    ) -> String {
        self.record_calculation_at(calculator_id, inputs, outputs, source_versions, Utc::now())
    }

    pub fn record_calculation_at(
        &self,
        calculator_id: &str,
        inputs: &Value,
        outputs: &Value,
        source_versions: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> String {
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        g.next_calculation += 1;
        let id = format!("calc-{}", g.next_calculation);
        let record = CalculationRecord {
            id: id.clone(),
            calculator_id: calculator_id.to_string(),
            timestamp: now,
            inputs: inputs.clone(),
            outputs: outputs.clone(),
            source_versions,
        };
        g.calculations.insert(id.clone(), record);
        tracing::debug!(target: "versions", calculator = calculator_id, %id, "recorded calculation");
        id
    }

    pub fn get_calculation(&self, calculation_id: &str) -> Option<CalculationRecord> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        g.calculations.get(calculation_id).cloned()
    }

    /// Runs of one calculator, oldest first.
    pub fn calculations_for(&self, calculator_id: &str) -> Vec<CalculationRecord> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut v: Vec<_> = g
            .calculations
            .values()
            .filter(|c| c.calculator_id == calculator_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        v
    }

    /// `None` for an unknown calculation id.
    pub fn reproduce(&self, calculation_id: &str) -> Option<Reproduction> {
        let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let calc = g.calculations.get(calculation_id)?;

        let mut versions_used = BTreeMap::new();
        let mut missing_versions = Vec::new();
        let mut diffs = Vec::new();

        for (source_id, version_id) in &calc.source_versions {
            let Some(used) = g.find(source_id, version_id) else {
                missing_versions.push((source_id.clone(), version_id.clone()));
                continue;
            };
            if let Some(latest) = g.versions.get(source_id).and_then(|l| l.last()) {
                if latest.id != used.id {
                    diffs.push(SourceDrift {
                        source_id: source_id.clone(),
                        used_version: used.id.clone(),
                        latest_version: latest.id.clone(),
                        changes: diff_values(&used.payload, &latest.payload),
                    });
                }
            }
            versions_used.insert(source_id.clone(), used.clone());
        }

        let is_reproducible = missing_versions.is_empty();
        if !is_reproducible {
            tracing::info!(
                target: "versions",
                calculation = calculation_id,
                missing = missing_versions.len(),
                "calculation no longer reproducible"
            );
        }

        Some(Reproduction {
            calculation_id: calculation_id.to_string(),
            original_outputs: calc.outputs.clone(),
            versions_used,
            missing_versions,
            is_reproducible,
            diffs,
        })
    }

    // ---- retention ----

    pub fn cleanup(&self, retention_days: i64) -> CleanupReport {
        self.cleanup_at(retention_days, Utc::now())
    }

    /// Removes versions and calculation records older than `now - retention_days`.
    pub fn cleanup_at(&self, retention_days: i64, now: DateTime<Utc>) -> CleanupReport {
        let cutoff = now - Duration::days(retention_days.max(0));
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let mut versions_removed = 0;
        for list in g.versions.values_mut() {
            let before = list.len();
            list.retain(|v| v.timestamp >= cutoff);
            versions_removed += before - list.len();
        }
        g.versions.retain(|_, l| !l.is_empty());

        let before = g.calculations.len();
        g.calculations.retain(|_, c| c.timestamp >= cutoff);
        let calculations_removed = before - g.calculations.len();

        if versions_removed + calculations_removed > 0 {
            tracing::info!(
                target: "versions",
                versions_removed,
                calculations_removed,
                %cutoff,
                "ledger cleanup"
            );
        }
        CleanupReport {
            versions_removed,
            calculations_removed,
        }
    }

    // ---- persistence ----

    /// Writes the whole ledger as JSON (temp file + rename).
    pub fn save_to_path(&self, path: &Path) -> DataResult<()> {
        let bytes = {
            let g = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_vec_pretty(&*g).map_err(|e| DataError::Persistence(e.to_string()))?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| DataError::Persistence(format!("{}: {e}", dir.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .map_err(|e| DataError::Persistence(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| DataError::Persistence(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    /// Loads a ledger written by `save_to_path`. Versions beyond the cap are
    /// evicted oldest first.
    pub fn load_from_path(path: &Path, max_versions_per_source: usize) -> DataResult<Self> {
        let s = fs::read_to_string(path)
            .map_err(|e| DataError::Persistence(format!("{}: {e}", path.display())))?;
        let mut ledger: Ledger =
            serde_json::from_str(&s).map_err(|e| DataError::Persistence(e.to_string()))?;
        let store = Self::new(max_versions_per_source);
        for list in ledger.versions.values_mut() {
            list.sort_by_key(|v| v.sequence);
            if list.len() > store.max_versions {
                let excess = list.len() - store.max_versions;
                list.drain(0..excess);
            }
        }
        *store.inner.write().unwrap_or_else(PoisonError::into_inner) = ledger;
        Ok(store)
    }
}
