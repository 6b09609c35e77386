// src/hub.rs
//! `DataHub`: one owning instance of each service behind the surface that
//! calculators and the HTTP layer use.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{FetchMode, HubConfig};
use crate::error::{DataError, DataResult};
use crate::notify::{Notifier, NotifierMux};
use crate::scheduler::job::{JobPriority, UpdateJob};
use crate::scheduler::stats::SchedulerStatistics;
use crate::scheduler::Scheduler;
use crate::service::fallback::FallbackCatalog;
use crate::service::providers::{fixture::FixtureFetcher, http::HttpFetcher};
use crate::service::typed::{LegalMultipliers, MarketData, MortgageRates};
use crate::service::types::Fetcher;
use crate::service::DataService;
use crate::sources::default_catalog;
use crate::validation::{QualityReport, ValidationEngine};
use crate::versioning::diff::FieldChange;
use crate::versioning::{
    CalculationRecord, DataVersion, Reproduction, VersionMetadata, VersionStore,
};

#[derive(Clone)]
pub struct DataHub {
    data: Arc<DataService>,
    versions: Arc<VersionStore>,
    validation: Arc<ValidationEngine>,
    scheduler: Arc<Scheduler>,
}

impl DataHub {
    /// Wire the services together around an existing ledger.
    pub fn new(
        data: Arc<DataService>,
        versions: Arc<VersionStore>,
        validation: Arc<ValidationEngine>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            data,
            versions,
            validation,
            scheduler: Arc::new(scheduler),
        }
    }

    /// Builds the default source catalog, the configured fetcher, the built-in
    /// rule sets and, if `ledger_path` points at an existing snapshot, the
    /// ledger restored from it.
    pub fn from_config(cfg: &HubConfig) -> Result<Self> {
        let fallback = FallbackCatalog::builtin();
        let fetcher: Arc<dyn Fetcher> = match cfg.fetch.mode {
            FetchMode::Http => Arc::new(
                HttpFetcher::new(
                    cfg.fetch.base_url.clone(),
                    cfg.fetch.timeout_secs,
                    cfg.fetch.user_agent.as_deref(),
                )
                .context("building http fetcher")?,
            ),
            FetchMode::Fixture => Arc::new(FixtureFetcher::from_fallback(&fallback)),
        };
        let data = Arc::new(DataService::new(default_catalog(), fetcher, fallback));

        let max = cfg.versions.max_versions_per_source;
        let versions = match &cfg.versions.ledger_path {
            Some(path) if path.exists() => VersionStore::load_from_path(path, max)
                .with_context(|| format!("loading ledger {}", path.display()))?,
            _ => VersionStore::new(max),
        };
        let versions = Arc::new(versions);
        let validation = Arc::new(ValidationEngine::with_default_rules());
        let notifier: Arc<dyn Notifier> = Arc::new(NotifierMux::from_env());

        let scheduler = Scheduler::new(data.clone(), versions.clone(), cfg.scheduler.clone())
            .with_validation(validation.clone())
            .with_notifier(notifier)
            .with_ledger(cfg.versions.retention_days, cfg.versions.ledger_path.clone());

        tracing::info!(
            target: "data",
            fetcher = data.fetcher_name(),
            sources = data.sources().len(),
            versions = versions.sources().len(),
            "data hub ready"
        );
        Ok(Self::new(data, versions, validation, scheduler))
    }

    pub fn data(&self) -> &Arc<DataService> {
        &self.data
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn validation(&self) -> &Arc<ValidationEngine> {
        &self.validation
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // ---- data ----

    pub async fn get_data(&self, source_id: &str, force_refresh: bool) -> DataResult<Value> {
        self.data.get_data(source_id, force_refresh).await
    }

    /// `get_data` deserialized into `T`; shape mismatch is `MalformedPayload`.
    pub async fn get_data_as<T: DeserializeOwned>(
        &self,
        source_id: &str,
        force_refresh: bool,
    ) -> DataResult<T> {
        let v = self.data.get_data(source_id, force_refresh).await?;
        serde_json::from_value(v).map_err(|e| DataError::malformed(source_id, e))
    }

    pub async fn get_regional_data(&self, category: &str, region: &str) -> DataResult<f64> {
        self.data.get_regional_data(category, region).await
    }

    pub async fn get_mortgage_rates(&self) -> DataResult<MortgageRates> {
        self.data.get_mortgage_rates().await
    }

    pub async fn get_legal_multipliers(&self, jurisdiction: &str) -> DataResult<LegalMultipliers> {
        self.data.get_legal_multipliers(jurisdiction).await
    }

    pub async fn get_market_data(&self) -> DataResult<MarketData> {
        self.data.get_market_data().await
    }

    // ---- versions ----

    pub fn store_data_version(
        &self,
        source_id: &str,
        payload: &Value,
        metadata: VersionMetadata,
    ) -> String {
        self.versions.store_version(source_id, payload, metadata)
    }

    /// Latest version when `version_id` is `None`.
    pub fn get_data_version(&self, source_id: &str, version_id: Option<&str>) -> Option<DataVersion> {
        self.versions.get_version(source_id, version_id)
    }

    pub fn get_data_at_timestamp(&self, source_id: &str, at: DateTime<Utc>) -> Option<DataVersion> {
        self.versions.get_as_of(source_id, at)
    }

    pub fn store_calculation(
        &self,
        calculator_id: &str,
        inputs: &Value,
        outputs: &Value,
        source_versions: BTreeMap<String, String>,
    ) -> String {
        self.versions
            .record_calculation(calculator_id, inputs, outputs, source_versions)
    }

    pub fn get_calculation(&self, calculation_id: &str) -> Option<CalculationRecord> {
        self.versions.get_calculation(calculation_id)
    }

    pub fn reproduce_calculation(&self, calculation_id: &str) -> Option<Reproduction> {
        self.versions.reproduce(calculation_id)
    }

    pub fn compare_versions(
        &self,
        source_id: &str,
        version_a: &str,
        version_b: &str,
    ) -> Option<Vec<FieldChange>> {
        self.versions.compare_versions(source_id, version_a, version_b)
    }

    // ---- validation ----

    pub fn validate_data(&self, source_id: &str, payload: &Value) -> QualityReport {
        self.validation.validate(source_id, payload)
    }

    // ---- scheduler ----

    pub fn schedule_job(
        &self,
        source_id: &str,
        when: DateTime<Utc>,
        priority: JobPriority,
    ) -> DataResult<String> {
        self.scheduler.schedule_job(source_id, when, priority)
    }

    pub fn schedule_immediate_update(&self, source_id: &str) -> DataResult<String> {
        self.scheduler.schedule_immediate_update(source_id)
    }

    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.scheduler.cancel_job(job_id)
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<UpdateJob> {
        self.scheduler.get_job_status(job_id)
    }

    pub fn get_jobs_for_source(&self, source_id: &str) -> Vec<UpdateJob> {
        self.scheduler.get_jobs_for_source(source_id)
    }

    pub fn get_statistics(&self) -> SchedulerStatistics {
        self.scheduler.get_statistics()
    }

    pub fn start(&self) {
        self.scheduler.start();
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }
}
