// tests/scheduler.rs
//
// Scheduler lifecycle end to end: retry sequence with notification,
// admission bound under in-flight fetches, validation notes on versions and
// shutdown while a failure notification is still being delivered.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use calc_data_hub::config::SchedulerConfig;
use calc_data_hub::notify::{JobFailedEvent, Notifier};
use calc_data_hub::scheduler::job::{JobPriority, JobStatus};
use calc_data_hub::scheduler::Scheduler;
use calc_data_hub::service::fallback::FallbackCatalog;
use calc_data_hub::service::providers::fixture::FixtureFetcher;
use calc_data_hub::service::types::Fetcher;
use calc_data_hub::service::DataService;
use calc_data_hub::sources::{default_catalog, DataSourceDescriptor, MORTGAGE_RATES};
use calc_data_hub::validation::ValidationEngine;
use calc_data_hub::versioning::{UpdateReason, VersionStore};

struct AlwaysDown;

#[async_trait::async_trait]
impl Fetcher for AlwaysDown {
    async fn fetch(&self, _source: &DataSourceDescriptor) -> anyhow::Result<Value> {
        anyhow::bail!("503 Service Unavailable")
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

/// Blocks every fetch until a permit is released.
struct Gated {
    gate: Semaphore,
    started: AtomicUsize,
    fail: bool,
}

impl Gated {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            fail,
        })
    }

    async fn wait_started(&self, n: usize) {
        while self.started.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for Gated {
    async fn fetch(&self, source: &DataSourceDescriptor) -> anyhow::Result<Value> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await?;
        permit.forget();
        if self.fail {
            anyhow::bail!("503 Service Unavailable");
        }
        Ok(json!({ "source": source.id }))
    }
    fn name(&self) -> &'static str {
        "gated"
    }
}

#[derive(Default)]
struct Recording(Mutex<Vec<JobFailedEvent>>);

#[async_trait::async_trait]
impl Notifier for Recording {
    async fn send(&self, ev: &JobFailedEvent) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(ev.clone());
        Ok(())
    }
    fn name(&self) -> &'static str {
        "recording"
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
}

fn build(fetcher: Arc<dyn Fetcher>, cfg: SchedulerConfig) -> (Scheduler, Arc<VersionStore>) {
    let data = Arc::new(DataService::new(
        default_catalog(),
        fetcher,
        FallbackCatalog::builtin(),
    ));
    let versions = Arc::new(VersionStore::default());
    (Scheduler::new(data, versions.clone(), cfg), versions)
}

#[tokio::test]
async fn always_failing_job_walks_pending_running_failed() {
    let cfg = SchedulerConfig {
        retry_delay_secs: 60,
        ..SchedulerConfig::default()
    };
    let notes = Arc::new(Recording::default());
    let (s, versions) = build(Arc::new(AlwaysDown), cfg.clone());
    let s = Arc::new(s.with_notifier(notes.clone()));

    let id = s
        .schedule_job_with(MORTGAGE_RATES, t0(), JobPriority::Normal, UpdateReason::Scheduled, 3)
        .unwrap();

    let mut seen = Vec::new();
    let mut now = t0();
    for _ in 0..3 {
        assert_eq!(s.get_job_status(&id).unwrap().status, JobStatus::Pending);
        assert_eq!(s.run_due_jobs_at(now).await, 1);
        let j = s.get_job_status(&id).unwrap();
        seen.push((j.status, j.attempts));
        now = now + cfg.retry_delay();
    }

    assert_eq!(
        seen,
        vec![
            (JobStatus::Pending, 1),
            (JobStatus::Pending, 2),
            (JobStatus::Failed, 3),
        ]
    );
    assert_eq!(s.run_due_jobs_at(now).await, 0);
    assert_eq!(versions.version_count(MORTGAGE_RATES), 0);

    let events = notes.0.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].job_id, id);
    assert_eq!(events[0].attempts, 3);

    let stats = s.get_statistics();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test]
async fn each_attempt_is_visible_as_running_while_the_fetch_is_in_flight() {
    let cfg = SchedulerConfig::default();
    let gated = Gated::new(true);
    let (s, _) = build(gated.clone(), cfg.clone());
    let s = Arc::new(s);
    let id = s
        .schedule_job_with(MORTGAGE_RATES, t0(), JobPriority::Normal, UpdateReason::Scheduled, 3)
        .unwrap();

    let mut now = t0();
    for attempt in 1..=3u32 {
        let runner = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_due_jobs_at(now).await })
        };
        gated.wait_started(attempt as usize).await;

        let j = s.get_job_status(&id).unwrap();
        assert_eq!((j.status, j.attempts), (JobStatus::Running, attempt));
        assert_eq!(j.started_at, Some(now));

        gated.gate.add_permits(1);
        assert_eq!(runner.await.unwrap(), 1);
        now = now + cfg.retry_delay();
    }

    let j = s.get_job_status(&id).unwrap();
    assert_eq!((j.status, j.attempts), (JobStatus::Failed, 3));
    assert_eq!(s.running_count(), 0);
}

/// Fetch that never returns.
struct Hung;

#[async_trait::async_trait]
impl Fetcher for Hung {
    async fn fetch(&self, _source: &DataSourceDescriptor) -> anyhow::Result<Value> {
        std::future::pending::<anyhow::Result<Value>>().await
    }
    fn name(&self) -> &'static str {
        "hung"
    }
}

/// Takes a minute to deliver anything.
#[derive(Default)]
struct SlowWebhook {
    started: AtomicUsize,
}

#[async_trait::async_trait]
impl Notifier for SlowWebhook {
    async fn send(&self, _ev: &JobFailedEvent) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok(())
    }
    fn name(&self) -> &'static str {
        "slow-webhook"
    }
}

#[tokio::test]
async fn slow_failure_delivery_does_not_hold_up_stop() {
    let cfg = SchedulerConfig {
        tick_interval_secs: 1,
        health_interval_secs: 1,
        stuck_threshold_secs: 1,
        max_attempts: 1,
        max_concurrent_jobs: 1,
        ..SchedulerConfig::default()
    };
    let webhook = Arc::new(SlowWebhook::default());
    let (s, _) = build(Arc::new(Hung), cfg);
    let s = Arc::new(s.with_notifier(webhook.clone()));
    s.start();

    // the first admitted job hangs, goes stale and is failed by the health sweep
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while webhook.started.load(Ordering::SeqCst) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no failure was reported");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(s.get_statistics().failed >= 1);

    let stopped = tokio::time::timeout(std::time::Duration::from_secs(2), s.stop()).await;
    assert!(stopped.is_ok(), "stop waited on the notification");
    assert!(!s.is_running());
}

#[tokio::test]
async fn running_jobs_never_exceed_the_limit() {
    let gated = Gated::new(false);
    let cfg = SchedulerConfig {
        max_concurrent_jobs: 2,
        ..SchedulerConfig::default()
    };
    let (s, versions) = build(gated.clone(), cfg);
    let s = Arc::new(s);
    for source in default_catalog() {
        s.schedule_job(&source.id, t0(), JobPriority::Normal).unwrap();
    }

    let runner = {
        let s = Arc::clone(&s);
        tokio::spawn(async move { s.run_due_jobs_at(t0()).await })
    };
    gated.wait_started(2).await;

    assert_eq!(s.running_count(), 2);
    assert_eq!(s.get_statistics().running, 2);
    // nothing more is admitted while both slots are busy
    assert_eq!(s.run_due_jobs_at(t0()).await, 0);

    gated.gate.add_permits(2);
    assert_eq!(runner.await.unwrap(), 2);
    assert_eq!(s.running_count(), 0);
    assert_eq!(s.get_statistics().completed, 2);
    assert_eq!(versions.sources().len(), 2);
}

#[tokio::test]
async fn validated_refresh_records_quality_in_version_notes() {
    let fallback = FallbackCatalog::builtin();
    let data = Arc::new(DataService::new(
        default_catalog(),
        Arc::new(FixtureFetcher::from_fallback(&fallback)),
        fallback,
    ));
    let versions = Arc::new(VersionStore::default());
    let s = Arc::new(
        Scheduler::new(data.clone(), versions.clone(), SchedulerConfig::default())
            .with_validation(Arc::new(ValidationEngine::with_default_rules())),
    );

    let now = Utc.with_ymd_and_hms(2025, 1, 4, 0, 0, 0).unwrap();
    let id = s.schedule_job(MORTGAGE_RATES, now, JobPriority::High).unwrap();
    s.run_due_jobs_at(now).await;

    assert_eq!(s.get_job_status(&id).unwrap().status, JobStatus::Completed);
    let v = versions.get_version(MORTGAGE_RATES, None).unwrap();
    assert_eq!(v.metadata.notes.as_deref(), Some("quality score 100"));
    assert_eq!(v.metadata.validated_by.as_deref(), Some("validation-engine"));
    assert_eq!(v.metadata.origin, "fixture");
    assert_eq!(data.source(MORTGAGE_RATES).unwrap().last_updated, Some(now));

    // same content on the next refresh does not create a new version
    let next = s
        .schedule_job_with(MORTGAGE_RATES, now, JobPriority::Critical, UpdateReason::Manual, 3)
        .unwrap();
    s.run_due_jobs_at(now).await;
    assert_eq!(s.get_job_status(&next).unwrap().status, JobStatus::Completed);
    assert_eq!(versions.version_count(MORTGAGE_RATES), 1);
}

#[tokio::test]
async fn immediate_update_is_critical_and_manual() {
    let (s, _) = build(Arc::new(AlwaysDown), SchedulerConfig::default());
    let id = s.schedule_immediate_update(MORTGAGE_RATES).unwrap();
    let j = s.get_job_status(&id).unwrap();
    assert_eq!(j.priority, JobPriority::Critical);
    assert_eq!(j.reason, UpdateReason::Manual);
    assert_eq!(j.status, JobStatus::Pending);
    assert!(s.schedule_immediate_update("unknown").is_err());
}
