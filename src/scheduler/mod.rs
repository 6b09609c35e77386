// src/scheduler/mod.rs
//! Background refresh scheduler.
//!
//! Job lifecycle:
//! ```text
//! pending --(admitted)--> running --(ok)----------------------> completed
//!                         running --(err, attempts < max)-----> pending (now + retry delay)
//!                         running --(err, attempts == max)----> failed  (+ notification)
//! pending --(cancel_job)--> cancelled
//! ```
//! Admission, completion and the health sweep all mutate the job table under
//! one mutex; the only await point inside an execution is the fetch.

pub mod job;
pub mod stats;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::error::{DataError, DataResult};
use crate::notify::{JobFailedEvent, LogNotifier, Notifier};
use crate::service::DataService;
use crate::validation::{ValidationContext, ValidationEngine};
use crate::versioning::{CleanupReport, UpdateReason, VersionMetadata, VersionStore};
use job::{JobPriority, JobStatus, UpdateJob};
use stats::SchedulerStatistics;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthReport {
    /// Stuck jobs put back to `pending`.
    pub recovered_jobs: usize,
    /// Stuck jobs that had no attempts left and were failed instead.
    pub failed_jobs: usize,
    pub pruned_jobs: usize,
    pub swept_cache_entries: usize,
    pub ledger: CleanupReport,
    pub ledger_persisted: bool,
}

#[derive(Debug, Clone)]
struct Admitted {
    job_id: String,
    source_id: String,
    attempt: u32,
    reason: UpdateReason,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, UpdateJob>,
    running: HashSet<String>,
    next_id: u64,
}

impl JobTable {
    fn insert(
        &mut self,
        source_id: &str,
        when: DateTime<Utc>,
        priority: JobPriority,
        reason: UpdateReason,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> String {
        self.next_id += 1;
        let id = format!("job-{}", self.next_id);
        self.jobs.insert(
            id.clone(),
            UpdateJob {
                id: id.clone(),
                source_id: source_id.to_string(),
                scheduled_time: when,
                status: JobStatus::Pending,
                attempts: 0,
                max_attempts: max_attempts.max(1),
                priority,
                reason,
                last_error: None,
                duration_ms: None,
                created_at: now,
                started_at: None,
                finished_at: None,
            },
        );
        id
    }

    fn has_pending(&self, source_id: &str) -> bool {
        self.jobs
            .values()
            .any(|j| j.source_id == source_id && j.status == JobStatus::Pending)
    }
}

/// Source of completion timestamps. The live loop stamps completions with
/// wall time; explicit-time runs reuse the caller's `now`.
#[derive(Debug, Clone, Copy)]
enum Clock {
    Wall,
    Fixed(DateTime<Utc>),
}

impl Clock {
    fn now(self) -> DateTime<Utc> {
        match self {
            Clock::Wall => Utc::now(),
            Clock::Fixed(t) => t,
        }
    }
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    data: Arc<DataService>,
    versions: Arc<VersionStore>,
    validation: Option<Arc<ValidationEngine>>,
    notifier: Arc<dyn Notifier>,
    cfg: SchedulerConfig,
    ledger_retention_days: Option<i64>,
    ledger_path: Option<PathBuf>,
    state: Mutex<JobTable>,
    runtime: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(data: Arc<DataService>, versions: Arc<VersionStore>, cfg: SchedulerConfig) -> Self {
        crate::metrics::ensure_metrics_described();
        Self {
            data,
            versions,
            validation: None,
            notifier: Arc::new(LogNotifier),
            cfg,
            ledger_retention_days: None,
            ledger_path: None,
            state: Mutex::new(JobTable::default()),
            runtime: Mutex::new(None),
        }
    }

    /// Score refreshed payloads and keep the score in the version notes.
    pub fn with_validation(mut self, engine: Arc<ValidationEngine>) -> Self {
        self.validation = Some(engine);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Ledger pruning and persistence done by the health sweep.
    pub fn with_ledger(mut self, retention_days: Option<i64>, path: Option<PathBuf>) -> Self {
        self.ledger_retention_days = retention_days;
        self.ledger_path = path;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    fn table(&self) -> std::sync::MutexGuard<'_, JobTable> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- job management ----

    pub fn schedule_job(
        &self,
        source_id: &str,
        when: DateTime<Utc>,
        priority: JobPriority,
    ) -> DataResult<String> {
        self.schedule_job_with(
            source_id,
            when,
            priority,
            UpdateReason::Scheduled,
            self.cfg.max_attempts,
        )
    }

    pub fn schedule_job_with(
        &self,
        source_id: &str,
        when: DateTime<Utc>,
        priority: JobPriority,
        reason: UpdateReason,
        max_attempts: u32,
    ) -> DataResult<String> {
        if self.data.source(source_id).is_none() {
            return Err(DataError::UnknownSource(source_id.to_string()));
        }
        let id = self.table().insert(
            source_id,
            when,
            priority,
            reason,
            max_attempts,
            Utc::now(),
        );
        tracing::debug!(target: "scheduler", job = %id, source = source_id, ?priority, %when, "job scheduled");
        Ok(id)
    }

    /// Critical job due right away.
    pub fn schedule_immediate_update(&self, source_id: &str) -> DataResult<String> {
        self.schedule_job_with(
            source_id,
            Utc::now(),
            JobPriority::Critical,
            UpdateReason::Manual,
            self.cfg.max_attempts,
        )
    }

    /// Only pending jobs can be cancelled.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.cancel_job_at(job_id, Utc::now())
    }

    pub fn cancel_job_at(&self, job_id: &str, now: DateTime<Utc>) -> bool {
        let mut g = self.table();
        match g.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
                tracing::info!(target: "scheduler", job = job_id, source = %job.source_id, "job cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<UpdateJob> {
        self.table().jobs.get(job_id).cloned()
    }

    /// In creation order.
    pub fn get_jobs_for_source(&self, source_id: &str) -> Vec<UpdateJob> {
        let mut jobs: Vec<UpdateJob> = self
            .table()
            .jobs
            .values()
            .filter(|j| j.source_id == source_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| job_seq(&j.id));
        jobs
    }

    pub fn running_count(&self) -> usize {
        self.table().running.len()
    }

    pub fn get_statistics(&self) -> SchedulerStatistics {
        SchedulerStatistics::from_jobs(self.table().jobs.values())
    }

    // ---- admission & execution ----

    fn admit_due_jobs_at(&self, now: DateTime<Utc>) -> Vec<Admitted> {
        let mut g = self.table();
        let table = &mut *g;
        let capacity = self
            .cfg
            .max_concurrent_jobs
            .saturating_sub(table.running.len());
        if capacity == 0 {
            return Vec::new();
        }

        let mut due: Vec<&UpdateJob> = table
            .jobs
            .values()
            .filter(|j| j.is_due(now) && !table.running.contains(&j.id))
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.scheduled_time.cmp(&b.scheduled_time))
                .then_with(|| job_seq(&a.id).cmp(&job_seq(&b.id)))
        });
        let picked: Vec<String> = due.into_iter().take(capacity).map(|j| j.id.clone()).collect();

        let mut admitted = Vec::with_capacity(picked.len());
        for id in picked {
            if let Some(job) = table.jobs.get_mut(&id) {
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.started_at = Some(now);
                table.running.insert(id.clone());
                admitted.push(Admitted {
                    job_id: id,
                    source_id: job.source_id.clone(),
                    attempt: job.attempts,
                    reason: job.reason,
                });
            }
        }
        gauge!("scheduler_running_jobs").set(table.running.len() as f64);
        admitted
    }

    /// Admit every due job (within the concurrency limit) and wait for all of
    /// them to finish. Returns the number of jobs executed.
    pub async fn run_due_jobs(self: &Arc<Self>) -> usize {
        self.run_admitted(Utc::now(), Clock::Wall).await
    }

    /// Like [`Scheduler::run_due_jobs`], with every transition stamped `now`.
    pub async fn run_due_jobs_at(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        self.run_admitted(now, Clock::Fixed(now)).await
    }

    async fn run_admitted(self: &Arc<Self>, now: DateTime<Utc>, clock: Clock) -> usize {
        let admitted = self.admit_due_jobs_at(now);
        let n = admitted.len();
        let mut set = JoinSet::new();
        for job in admitted {
            let me = Arc::clone(self);
            set.spawn(async move { me.execute(job, now, clock).await });
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                tracing::error!(target: "scheduler", error = ?e, "job execution task failed");
            }
        }
        n
    }

    async fn execute(&self, job: Admitted, admitted_at: DateTime<Utc>, clock: Clock) {
        tracing::debug!(target: "scheduler", job = %job.job_id, source = %job.source_id, attempt = job.attempt, "job started");
        let started = std::time::Instant::now();
        let result = self.refresh_source(&job, admitted_at).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("scheduler_job_duration_ms").record(elapsed_ms as f64);
        self.finish(job, result, clock.now(), elapsed_ms).await;
    }

    async fn refresh_source(&self, job: &Admitted, now: DateTime<Utc>) -> Result<String, String> {
        let fetched = self
            .data
            .fetch_at(&job.source_id, true, now)
            .await
            .map_err(|e| e.to_string())?;
        if fetched.origin.is_degraded() {
            return Err(format!(
                "refresh for {} did not reach the origin (served {:?})",
                job.source_id, fetched.origin
            ));
        }

        let mut meta = VersionMetadata::new(self.data.fetcher_name(), job.reason);
        if let Some(engine) = &self.validation {
            let report = engine.validate_with_context(
                &job.source_id,
                &fetched.payload,
                &ValidationContext::at(now),
            );
            meta = meta
                .validated_by("validation-engine")
                .with_notes(format!("quality score {}", report.overall_score));
        }
        let version_id = self
            .versions
            .store_version_at(&job.source_id, &fetched.payload, meta, now);
        self.data.mark_updated(&job.source_id, now);
        Ok(version_id)
    }

    async fn finish(
        &self,
        job: Admitted,
        result: Result<String, String>,
        now: DateTime<Utc>,
        elapsed_ms: u64,
    ) {
        // looked up before taking the job lock
        let cadence = self.data.source(&job.source_id).map(|d| d.cadence);

        let failed_event = {
            let mut g = self.table();
            let table = &mut *g;
            let Some(entry) = table.jobs.get_mut(&job.job_id) else {
                return;
            };
            if entry.status != JobStatus::Running || entry.attempts != job.attempt {
                tracing::debug!(target: "scheduler", job = %job.job_id, attempt = job.attempt, "stale completion ignored");
                return;
            }
            table.running.remove(&job.job_id);
            entry.duration_ms = Some(elapsed_ms);

            let event = match result {
                Ok(version_id) => {
                    entry.status = JobStatus::Completed;
                    entry.finished_at = Some(now);
                    entry.last_error = None;
                    counter!("scheduler_jobs_completed_total").increment(1);
                    tracing::info!(target: "scheduler", job = %job.job_id, source = %job.source_id, version = %version_id, "job completed");

                    if let Some(cadence) = cadence {
                        if !table.has_pending(&job.source_id) {
                            let next = table.insert(
                                &job.source_id,
                                now + cadence.window(),
                                JobPriority::Normal,
                                UpdateReason::Scheduled,
                                self.cfg.max_attempts,
                                now,
                            );
                            tracing::debug!(target: "scheduler", job = %next, source = %job.source_id, "next refresh scheduled");
                        }
                    }
                    None
                }
                Err(err) if entry.attempts < entry.max_attempts => {
                    entry.status = JobStatus::Pending;
                    entry.scheduled_time = now + self.cfg.retry_delay();
                    entry.last_error = Some(err.clone());
                    counter!("scheduler_job_retries_total").increment(1);
                    tracing::warn!(
                        target: "scheduler",
                        job = %job.job_id,
                        source = %job.source_id,
                        attempt = entry.attempts,
                        max_attempts = entry.max_attempts,
                        error = %err,
                        "job failed, retry scheduled"
                    );
                    None
                }
                Err(err) => {
                    entry.status = JobStatus::Failed;
                    entry.finished_at = Some(now);
                    entry.last_error = Some(err.clone());
                    counter!("scheduler_jobs_failed_total").increment(1);
                    tracing::error!(target: "scheduler", job = %job.job_id, source = %job.source_id, attempts = entry.attempts, error = %err, "job failed permanently");
                    Some(JobFailedEvent {
                        job_id: job.job_id.clone(),
                        source_id: job.source_id.clone(),
                        attempts: entry.attempts,
                        last_error: err,
                        ts: now,
                    })
                }
            };
            gauge!("scheduler_running_jobs").set(table.running.len() as f64);
            event
        };

        if let Some(ev) = failed_event {
            self.send_notification(&ev).await;
        }
    }

    async fn send_notification(&self, ev: &JobFailedEvent) {
        if let Err(e) = self.notifier.send(ev).await {
            tracing::warn!(target: "notify", notifier = self.notifier.name(), error = ?e, "failure notification not delivered");
        }
    }

    // ---- health ----

    pub async fn health_check(&self) -> HealthReport {
        self.health_check_at(Utc::now()).await
    }

    /// Reclaims stuck jobs, prunes old terminal jobs, sweeps expired cache
    /// entries and, when configured, prunes and persists the version ledger.
    /// Failure notifications for stuck jobs are delivered before returning.
    pub async fn health_check_at(&self, now: DateTime<Utc>) -> HealthReport {
        let (report, events) = self.sweep_at(now);
        for ev in &events {
            self.send_notification(ev).await;
        }
        report
    }

    /// The synchronous part of a health check. Returns the failure events
    /// the caller still has to deliver.
    fn sweep_at(&self, now: DateTime<Utc>) -> (HealthReport, Vec<JobFailedEvent>) {
        let mut report = HealthReport::default();
        let stuck_cutoff = now - self.cfg.stuck_threshold();
        let retention_cutoff = now - self.cfg.job_retention();

        let events = {
            let mut g = self.table();
            let table = &mut *g;
            let mut events = Vec::new();

            for job in table.jobs.values_mut() {
                if job.status != JobStatus::Running {
                    continue;
                }
                let started = job.started_at.unwrap_or(job.created_at);
                if started > stuck_cutoff {
                    continue;
                }
                table.running.remove(&job.id);
                let err = format!("job stuck in running since {started}");
                job.last_error = Some(err.clone());
                if job.attempts < job.max_attempts {
                    job.status = JobStatus::Pending;
                    job.scheduled_time = now;
                    report.recovered_jobs += 1;
                    tracing::warn!(target: "scheduler", job = %job.id, source = %job.source_id, "stuck job reset to pending");
                } else {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(now);
                    report.failed_jobs += 1;
                    counter!("scheduler_jobs_failed_total").increment(1);
                    tracing::error!(target: "scheduler", job = %job.id, source = %job.source_id, "stuck job out of attempts");
                    events.push(JobFailedEvent {
                        job_id: job.id.clone(),
                        source_id: job.source_id.clone(),
                        attempts: job.attempts,
                        last_error: err,
                        ts: now,
                    });
                }
            }

            let before = table.jobs.len();
            table.jobs.retain(|_, j| {
                !(j.status.is_terminal() && j.finished_at.unwrap_or(j.created_at) < retention_cutoff)
            });
            report.pruned_jobs = before - table.jobs.len();
            gauge!("scheduler_running_jobs").set(table.running.len() as f64);
            events
        };

        report.swept_cache_entries = self.data.sweep_expired_at(now);

        if let Some(days) = self.ledger_retention_days {
            report.ledger = self.versions.cleanup_at(days, now);
        }
        if let Some(path) = &self.ledger_path {
            match self.versions.save_to_path(path) {
                Ok(()) => report.ledger_persisted = true,
                Err(e) => {
                    tracing::warn!(target: "scheduler", error = %e, path = %path.display(), "ledger snapshot failed")
                }
            }
        }

        tracing::info!(
            target: "scheduler",
            recovered = report.recovered_jobs,
            failed = report.failed_jobs,
            pruned = report.pruned_jobs,
            swept = report.swept_cache_entries,
            versions_removed = report.ledger.versions_removed,
            "health sweep done"
        );
        (report, events)
    }

    // ---- loop ----

    /// Seeds one initial job per active source that has nothing pending and
    /// spawns the tick/health loop. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut rt = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if rt.is_some() {
            tracing::debug!(target: "scheduler", "already running");
            return;
        }

        let now = Utc::now();
        let seeded = {
            let mut g = self.table();
            let mut n = 0usize;
            for source in self.data.active_sources() {
                if !g.has_pending(&source.id) {
                    g.insert(
                        &source.id,
                        now,
                        JobPriority::Normal,
                        UpdateReason::Initial,
                        self.cfg.max_attempts,
                        now,
                    );
                    n += 1;
                }
            }
            n
        };

        let (tx, rx) = watch::channel(false);
        let me = Arc::clone(self);
        let task = tokio::spawn(async move { me.run_loop(rx).await });
        *rt = Some(LoopHandle { shutdown: tx, task });
        tracing::info!(
            target: "scheduler",
            seeded,
            tick_secs = self.cfg.tick_interval_secs,
            max_concurrent = self.cfg.max_concurrent_jobs,
            "scheduler started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.cfg.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let health_period = self.cfg.health_interval();
        let mut health =
            tokio::time::interval_at(tokio::time::Instant::now() + health_period, health_period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inflight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => {
                    let now = Utc::now();
                    for job in self.admit_due_jobs_at(now) {
                        let me = Arc::clone(&self);
                        inflight.spawn(async move { me.execute(job, now, Clock::Wall).await });
                    }
                }
                _ = health.tick() => {
                    // delivery can be slow; it must not hold up ticks or shutdown
                    let (_, events) = self.sweep_at(Utc::now());
                    for ev in events {
                        let me = Arc::clone(&self);
                        inflight.spawn(async move { me.send_notification(&ev).await });
                    }
                }
                Some(res) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            tracing::error!(target: "scheduler", error = ?e, "job execution panicked");
                        }
                    }
                }
            }
        }

        inflight.abort_all();
        while inflight.join_next().await.is_some() {}
    }

    /// Stops the loop and aborts in-flight executions along with undelivered
    /// failure notifications. Interrupted jobs go back to `pending` without
    /// consuming an attempt. Returns once the loop task has exited.
    pub async fn stop(&self) {
        let handle = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(LoopHandle { shutdown, task }) = handle else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(e) = task.await {
            tracing::warn!(target: "scheduler", error = ?e, "scheduler loop ended abnormally");
        }

        let mut g = self.table();
        let table = &mut *g;
        let mut requeued = 0usize;
        for id in table.running.drain() {
            if let Some(job) = table.jobs.get_mut(&id) {
                if job.status == JobStatus::Running {
                    job.status = JobStatus::Pending;
                    job.attempts = job.attempts.saturating_sub(1);
                    job.started_at = None;
                    requeued += 1;
                }
            }
        }
        gauge!("scheduler_running_jobs").set(0.0);
        tracing::info!(target: "scheduler", requeued, "scheduler stopped");
    }
}

fn job_seq(id: &str) -> u64 {
    id.strip_prefix("job-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fallback::FallbackCatalog;
    use crate::service::types::Fetcher;
    use crate::sources::{default_catalog, DataSourceDescriptor, MARKET_INDICES, MORTGAGE_RATES};
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Fetcher for Counting {
        async fn fetch(&self, source: &DataSourceDescriptor) -> anyhow::Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                anyhow::bail!("origin down");
            }
            Ok(json!({ "source": source.id, "call": n }))
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn scheduler(fail: bool, cfg: SchedulerConfig) -> (Arc<Scheduler>, Arc<Counting>, Arc<VersionStore>) {
        let fetcher = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail,
        });
        let data = Arc::new(DataService::new(
            default_catalog(),
            fetcher.clone(),
            FallbackCatalog::builtin(),
        ));
        let versions = Arc::new(VersionStore::default());
        let s = Arc::new(Scheduler::new(data, versions.clone(), cfg));
        (s, fetcher, versions)
    }

    #[test]
    fn unknown_source_is_rejected() {
        let (s, _, _) = scheduler(false, SchedulerConfig::default());
        let err = s.schedule_job("nope", t0(), JobPriority::Normal).unwrap_err();
        assert!(matches!(err, DataError::UnknownSource(_)));
    }

    #[tokio::test]
    async fn success_versions_and_schedules_next() {
        let (s, _, versions) = scheduler(false, SchedulerConfig::default());
        let id = s.schedule_job(MORTGAGE_RATES, t0(), JobPriority::Normal).unwrap();

        assert_eq!(s.run_due_jobs_at(t0()).await, 1);

        let job = s.get_job_status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(versions.version_count(MORTGAGE_RATES), 1);

        // creation order, even though the follow-up was created at t0
        let jobs = s.get_jobs_for_source(MORTGAGE_RATES);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, id);
        let next = &jobs[1];
        assert_eq!(next.created_at, t0());
        assert_eq!(next.status, JobStatus::Pending);
        assert_eq!(next.scheduled_time, t0() + Duration::hours(24));
        assert_eq!(next.priority, JobPriority::Normal);
    }

    #[tokio::test]
    async fn failures_retry_then_fail_terminally() {
        let cfg = SchedulerConfig::default();
        let delay = cfg.retry_delay();
        let (s, fetcher, versions) = scheduler(true, cfg);
        let id = s.schedule_job(MORTGAGE_RATES, t0(), JobPriority::High).unwrap();

        s.run_due_jobs_at(t0()).await;
        let j = s.get_job_status(&id).unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Pending, 1));
        assert_eq!(j.scheduled_time, t0() + delay);

        // not due yet
        assert_eq!(s.run_due_jobs_at(t0() + Duration::seconds(1)).await, 0);

        s.run_due_jobs_at(t0() + delay).await;
        let j = s.get_job_status(&id).unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Pending, 2));

        s.run_due_jobs_at(t0() + delay * 2).await;
        let j = s.get_job_status(&id).unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Failed, 3));
        assert!(j.last_error.is_some());

        assert_eq!(s.run_due_jobs_at(t0() + delay * 10).await, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        // fallback data is never versioned
        assert_eq!(versions.version_count(MORTGAGE_RATES), 0);
        assert_eq!(s.get_statistics().failed, 1);
    }

    #[tokio::test]
    async fn admission_respects_limit_and_priority() {
        let cfg = SchedulerConfig {
            max_concurrent_jobs: 2,
            ..SchedulerConfig::default()
        };
        let (s, _, _) = scheduler(false, cfg);
        let low = s.schedule_job(MORTGAGE_RATES, t0(), JobPriority::Low).unwrap();
        let crit = s.schedule_job(MARKET_INDICES, t0(), JobPriority::Critical).unwrap();
        let early_normal = s
            .schedule_job(MORTGAGE_RATES, t0() - Duration::minutes(5), JobPriority::Normal)
            .unwrap();

        let admitted = s.admit_due_jobs_at(t0());
        let ids: Vec<_> = admitted.iter().map(|a| a.job_id.clone()).collect();
        assert_eq!(ids, vec![crit, early_normal]);
        assert_eq!(s.running_count(), 2);
        assert!(s.admit_due_jobs_at(t0()).is_empty());
        assert_eq!(s.get_job_status(&low).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_only_pending() {
        let (s, _, _) = scheduler(false, SchedulerConfig::default());
        let a = s.schedule_job(MORTGAGE_RATES, t0(), JobPriority::Normal).unwrap();
        let b = s.schedule_job(MARKET_INDICES, t0(), JobPriority::Normal).unwrap();

        assert!(s.cancel_job(&a));
        assert!(!s.cancel_job(&a));
        assert!(!s.cancel_job("job-999"));

        s.admit_due_jobs_at(t0());
        assert!(!s.cancel_job(&b));
        assert_eq!(s.get_job_status(&a).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn cancel_at_stamps_the_given_time() {
        let (s, _, _) = scheduler(false, SchedulerConfig::default());
        let id = s.schedule_job(MORTGAGE_RATES, t0(), JobPriority::Normal).unwrap();
        let at = t0() + Duration::minutes(3);
        assert!(s.cancel_job_at(&id, at));
        assert_eq!(s.get_job_status(&id).unwrap().finished_at, Some(at));
    }

    struct Slow {
        fail: bool,
    }

    const SLOW_MS: i64 = 40;

    #[async_trait::async_trait]
    impl Fetcher for Slow {
        async fn fetch(&self, source: &DataSourceDescriptor) -> anyhow::Result<Value> {
            tokio::time::sleep(std::time::Duration::from_millis(SLOW_MS as u64)).await;
            if self.fail {
                anyhow::bail!("timed out");
            }
            Ok(json!({ "source": source.id }))
        }
        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn slow_scheduler(fail: bool) -> Arc<Scheduler> {
        let data = Arc::new(DataService::new(
            default_catalog(),
            Arc::new(Slow { fail }),
            FallbackCatalog::builtin(),
        ));
        Arc::new(Scheduler::new(
            data,
            Arc::new(VersionStore::default()),
            SchedulerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn live_run_retries_from_the_moment_of_failure() {
        let s = slow_scheduler(true);
        let delay = s.config().retry_delay();
        let id = s.schedule_job(MORTGAGE_RATES, Utc::now(), JobPriority::Normal).unwrap();
        assert_eq!(s.run_due_jobs().await, 1);

        let j = s.get_job_status(&id).unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        let started = j.started_at.unwrap();
        assert!(j.scheduled_time >= started + delay + Duration::milliseconds(SLOW_MS));
    }

    #[tokio::test]
    async fn live_run_stamps_completion_after_the_fetch() {
        let s = slow_scheduler(false);
        let id = s.schedule_job(MORTGAGE_RATES, Utc::now(), JobPriority::Normal).unwrap();
        assert_eq!(s.run_due_jobs().await, 1);

        let j = s.get_job_status(&id).unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        let (started, finished) = (j.started_at.unwrap(), j.finished_at.unwrap());
        assert!(finished - started >= Duration::milliseconds(SLOW_MS));
    }

    #[tokio::test]
    async fn health_sweep_reclaims_stuck_and_ignores_stale_completion() {
        let (s, _, _) = scheduler(false, SchedulerConfig::default());
        let id = s.schedule_job(MORTGAGE_RATES, t0(), JobPriority::Normal).unwrap();
        let first = s.admit_due_jobs_at(t0()).remove(0);

        let later = t0() + s.config().stuck_threshold() + Duration::seconds(1);
        let report = s.health_check_at(later).await;
        assert_eq!(report.recovered_jobs, 1);
        assert_eq!(s.running_count(), 0);
        let j = s.get_job_status(&id).unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.scheduled_time, later);

        let second = s.admit_due_jobs_at(later).remove(0);
        assert_eq!(second.attempt, 2);

        // the old execution finally reports back; it must not touch the job
        s.finish(first, Ok("x".into()), later, 1).await;
        let j = s.get_job_status(&id).unwrap();
        assert_eq!(j.status, JobStatus::Running);
        assert_eq!(j.attempts, 2);
    }

    #[tokio::test]
    async fn health_sweep_prunes_old_terminal_jobs() {
        let (s, _, _) = scheduler(false, SchedulerConfig::default());
        let id = s.schedule_job(MORTGAGE_RATES, t0(), JobPriority::Normal).unwrap();
        s.run_due_jobs_at(t0()).await;

        let report = s.health_check_at(t0() + Duration::hours(169)).await;
        assert_eq!(report.pruned_jobs, 1);
        assert!(s.get_job_status(&id).is_none());
        // the auto-scheduled follow-up is still pending
        assert_eq!(s.get_jobs_for_source(MORTGAGE_RATES).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_seeds_and_stop_joins() {
        let (s, _, _) = scheduler(false, SchedulerConfig::default());
        s.start();
        s.start();
        assert!(s.is_running());
        let stats = s.get_statistics();
        assert_eq!(stats.total, default_catalog().len());

        s.stop().await;
        assert!(!s.is_running());
        assert_eq!(s.running_count(), 0);
        assert!(s
            .get_jobs_for_source(MORTGAGE_RATES)
            .iter()
            .all(|j| j.status != JobStatus::Running));
    }
}
