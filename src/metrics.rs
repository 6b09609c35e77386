use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("data_fetch_total", "Live fetch attempts.");
        describe_counter!("data_fetch_errors_total", "Live fetches that failed.");
        describe_counter!("data_cache_hits_total", "Requests served from fresh cache.");
        describe_counter!(
            "data_stale_served_total",
            "Requests served from an expired cache entry after a failed fetch."
        );
        describe_counter!(
            "data_fallback_served_total",
            "Requests served from the compiled-in fallback catalog."
        );
        describe_histogram!("data_fetch_ms", "HTTP fetch time in milliseconds.");
        describe_counter!("versions_stored_total", "New data versions appended.");
        describe_counter!(
            "versions_dedup_total",
            "Store calls skipped because content matched the latest version."
        );
        describe_counter!("validation_runs_total", "Quality reports produced.");
        describe_counter!("scheduler_jobs_completed_total", "Jobs completed.");
        describe_counter!("scheduler_jobs_failed_total", "Jobs that exhausted retries.");
        describe_counter!("scheduler_job_retries_total", "Failed attempts scheduled for retry.");
        describe_gauge!("scheduler_running_jobs", "Jobs currently running.");
        describe_histogram!(
            "scheduler_job_duration_ms",
            "Job execution time in milliseconds."
        );
    });
}
