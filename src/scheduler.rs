//! Entry registry and tick loop.
//!
//! The tick task never runs user code: due entries are handed to spawned
//! wrapper tasks that re-read the catalog, apply the concurrency gate and
//! drive the executor. Wrapper tasks are tracked so `stop` can wait for them
//! (bounded by a timeout) while executions already under way keep running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::catalog::JobStore;
use crate::config::ConfigHandle;
use crate::cron_expr::CronSchedule;
use crate::error::{Error, Result};
use crate::exec_log::ExecSource;
use crate::executor::Executor;
use crate::gate::{Admission, GateMap};
use crate::job::{AllowMode, Job, JobId, JobState};

/// Default grace period for `stop`.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

const TICK_INTERVAL: Duration = Duration::from_millis(250);

struct Entry {
    seq: u64,
    policy: AllowMode,
    schedule: CronSchedule,
    next_fire: DateTime<Local>,
}

/// Read-only view of one scheduled entry.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub job_id: JobId,
    pub seq: u64,
    pub next_fire: DateTime<Local>,
}

/// Outcome of a manual invocation request.
#[derive(Debug, Clone)]
pub struct ManualRun {
    /// Fresh unique id when the invocation was accepted.
    pub exec_id: Option<String>,
    pub skipped: bool,
    pub reason: Option<String>,
}

impl ManualRun {
    fn started(exec_id: String) -> Self {
        Self {
            exec_id: Some(exec_id),
            skipped: false,
            reason: None,
        }
    }

    fn skipped(reason: &str) -> Self {
        Self {
            exec_id: None,
            skipped: true,
            reason: Some(reason.to_string()),
        }
    }
}

struct SchedulerInner {
    catalog: Arc<dyn JobStore>,
    executor: Arc<Executor>,
    gates: Arc<GateMap>,
    config: ConfigHandle,
    entries: RwLock<HashMap<JobId, Entry>>,
    seq: AtomicU64,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    tick_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    wrappers: AsyncMutex<JoinSet<()>>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<dyn JobStore>,
        executor: Arc<Executor>,
        gates: Arc<GateMap>,
        config: ConfigHandle,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                catalog,
                executor,
                gates,
                config,
                entries: RwLock::new(HashMap::new()),
                seq: AtomicU64::new(1),
                running: AtomicBool::new(false),
                shutdown,
                tick_handle: std::sync::Mutex::new(None),
                wrappers: AsyncMutex::new(JoinSet::new()),
            }),
        }
    }

    /// Parse the job's schedule and insert (or replace) its entry.
    pub async fn add(&self, job: &Job) -> Result<()> {
        let (schedule, next_fire) = self.parse_schedule(job)?;
        let policy = self.resolve_policy(job.allow_mode);

        let mut entries = self.inner.entries.write().await;
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        entries.insert(
            job.id,
            Entry {
                seq,
                policy,
                schedule,
                next_fire,
            },
        );
        tracing::info!(job_id = job.id, name = %job.name, cron = %job.cron_expr, "Job scheduled");
        Ok(())
    }

    /// Drop the entry and garbage-collect the job's gate.
    pub async fn remove(&self, job_id: JobId) -> Result<()> {
        if self.inner.entries.write().await.remove(&job_id).is_none() {
            return Err(Error::NotScheduled { id: job_id });
        }
        self.inner.gates.remove(job_id);
        tracing::info!(job_id, "Job unscheduled");
        Ok(())
    }

    /// Atomic remove-then-add. The new schedule is parsed before the old
    /// entry is touched, and the swap happens under one write lock, so a
    /// catalog edit never leaves a window with a half-replaced entry.
    pub async fn update_entry(&self, job: &Job) -> Result<()> {
        let (schedule, next_fire) = self.parse_schedule(job)?;
        let policy = self.resolve_policy(job.allow_mode);

        let mut entries = self.inner.entries.write().await;
        entries.remove(&job.id);
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        entries.insert(
            job.id,
            Entry {
                seq,
                policy,
                schedule,
                next_fire,
            },
        );
        tracing::info!(job_id = job.id, cron = %job.cron_expr, "Job entry updated");
        Ok(())
    }

    /// Snapshot of all entries in insertion order.
    pub async fn entries(&self) -> Vec<EntrySnapshot> {
        let entries = self.inner.entries.read().await;
        let mut snapshot: Vec<EntrySnapshot> = entries
            .iter()
            .map(|(id, e)| EntrySnapshot {
                job_id: *id,
                seq: e.seq,
                next_fire: e.next_fire,
            })
            .collect();
        snapshot.sort_by_key(|s| s.seq);
        snapshot
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawn the tick task. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        // send_replace resets the flag even when no receiver is left from a
        // previous start/stop cycle.
        self.inner.shutdown.send_replace(false);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        scheduler.dispatch_due(Local::now()).await;
                    }
                }
            }
        });
        *self.inner.tick_handle.lock().expect("tick handle lock poisoned") = Some(handle);
        tracing::info!("Scheduler started");
    }

    /// Stop the tick loop and wait up to `timeout` for in-flight wrapper
    /// invocations. Beyond the deadline the remaining tasks are detached;
    /// their executions run to completion and still write their records.
    pub async fn stop(&self, timeout: Duration) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            let _ = self.inner.shutdown.send(true);
            let handle = {
                self.inner
                    .tick_handle
                    .lock()
                    .expect("tick handle lock poisoned")
                    .take()
            };
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
        self.drain_wrappers(timeout).await;
        tracing::info!("Scheduler stopped");
    }

    /// Run a job once, outside its schedule.
    ///
    /// With `manual_allow_concurrent` set the invocation always runs in
    /// parallel; otherwise it shares the job's gate with scheduled fires:
    /// Skip may report `skipped` with a reason, Queue delays until the gate
    /// frees up.
    pub async fn run_manually(&self, job_id: JobId) -> Result<ManualRun> {
        let job = self
            .inner
            .catalog
            .get(job_id)?
            .ok_or(Error::NotFound { id: job_id })?;
        let cfg = self.inner.config.snapshot();
        let exec_id = Uuid::new_v4().to_string();

        // Global override: manual runs never wait on the per-job gate.
        if cfg.manual_allow_concurrent {
            self.spawn_fire(job_id, exec_id.clone(), ExecSource::Manual, None)
                .await;
            return Ok(ManualRun::started(exec_id));
        }

        match self.resolve_policy(job.allow_mode) {
            AllowMode::Parallel => {
                self.spawn_fire(job_id, exec_id.clone(), ExecSource::Manual, None)
                    .await;
                Ok(ManualRun::started(exec_id))
            }
            AllowMode::Skip => {
                match self
                    .inner
                    .gates
                    .admit(job_id, AllowMode::Skip, cfg.queue_max_waiters)
                    .await
                {
                    Admission::Run(permit) => {
                        self.spawn_fire(job_id, exec_id.clone(), ExecSource::Manual, permit)
                            .await;
                        Ok(ManualRun::started(exec_id))
                    }
                    Admission::Skipped { reason } => Ok(ManualRun::skipped(reason)),
                }
            }
            AllowMode::Queue => {
                // Manual Queue invocations delay, never skip: the waiter cap
                // applies only to scheduled fires.
                let scheduler = self.clone();
                let queued_exec_id = exec_id.clone();
                self.track(async move {
                    match scheduler
                        .inner
                        .gates
                        .admit(job_id, AllowMode::Queue, usize::MAX)
                        .await
                    {
                        Admission::Run(permit) => {
                            scheduler
                                .fire(job_id, &queued_exec_id, ExecSource::Manual)
                                .await;
                            drop(permit);
                        }
                        Admission::Skipped { reason } => {
                            tracing::warn!(job_id, reason, "Queued manual run dropped");
                        }
                    }
                })
                .await;
                Ok(ManualRun::started(exec_id))
            }
        }
    }

    fn parse_schedule(&self, job: &Job) -> Result<(CronSchedule, DateTime<Local>)> {
        let schedule = CronSchedule::parse(&job.cron_expr)?;
        let next_fire = schedule
            .next_after(Local::now())
            .ok_or_else(|| Error::InvalidCron {
                expr: job.cron_expr.clone(),
                reason: "no future fire times".to_string(),
            })?;
        Ok((schedule, next_fire))
    }

    /// A job-level Parallel defers to the configured global default.
    fn resolve_policy(&self, mode: AllowMode) -> AllowMode {
        if mode == AllowMode::Parallel {
            let global = self.inner.config.snapshot().default_allow_mode;
            if global != AllowMode::Parallel {
                return global;
            }
        }
        mode
    }

    /// Collect due entries under the write lock, advance their next-fire
    /// times, then dispatch outside the lock in insertion (seq) order.
    async fn dispatch_due(&self, now: DateTime<Local>) {
        let mut due: Vec<(u64, JobId, AllowMode)> = Vec::new();
        {
            let mut entries = self.inner.entries.write().await;
            let mut exhausted: Vec<JobId> = Vec::new();
            for (id, entry) in entries.iter_mut() {
                if entry.next_fire <= now {
                    due.push((entry.seq, *id, entry.policy));
                    match entry.schedule.next_after(now) {
                        Some(next) => entry.next_fire = next,
                        None => exhausted.push(*id),
                    }
                }
            }
            for id in exhausted {
                entries.remove(&id);
                tracing::warn!(job_id = id, "Schedule has no future fire times; entry removed");
            }
        }
        due.sort_by_key(|(seq, _, _)| *seq);

        for (_, job_id, policy) in due {
            let max_waiters = self.inner.config.snapshot().queue_max_waiters;
            let scheduler = self.clone();
            self.track(async move {
                match scheduler
                    .inner
                    .gates
                    .admit(job_id, policy, max_waiters)
                    .await
                {
                    Admission::Run(permit) => {
                        let exec_id = Uuid::new_v4().to_string();
                        scheduler.fire(job_id, &exec_id, ExecSource::Cron).await;
                        drop(permit);
                    }
                    Admission::Skipped { reason } => {
                        tracing::debug!(job_id, reason, "Scheduled fire skipped");
                    }
                }
            })
            .await;
        }
    }

    async fn spawn_fire(
        &self,
        job_id: JobId,
        exec_id: String,
        source: ExecSource,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) {
        let scheduler = self.clone();
        self.track(async move {
            scheduler.fire(job_id, &exec_id, source).await;
            drop(permit);
        })
        .await;
    }

    /// The wrapper lifecycle shared by scheduled and manual invocations.
    ///
    /// Reads the catalog by id instead of capturing a Job so every fire
    /// observes fresh state; all errors are swallowed here and never reach
    /// the tick task.
    async fn fire(&self, job_id: JobId, exec_id: &str, source: ExecSource) {
        // Stale scheduling race: the job may be gone or stopped by now.
        let job = match self.inner.catalog.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(job_id, "Job vanished before fire");
                return;
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Catalog read failed; fire dropped");
                return;
            }
        };
        if job.state == JobState::Stopped {
            return;
        }

        if job.cap_reached() {
            self.stop_capped(job_id).await;
            return;
        }

        // Best effort: a failed transition must not block the execution.
        if let Err(e) = self.inner.catalog.set_state(job_id, JobState::Running) {
            tracing::warn!(job_id, error = %e, "Failed to mark job running");
        }

        self.inner.executor.execute(&job, exec_id, source).await;

        match self.inner.catalog.increment_run_count(job_id) {
            Ok(count) if job.max_run_count > 0 && count >= job.max_run_count => {
                self.stop_capped(job_id).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                // The execution is not re-run; the record and metrics stand.
                tracing::warn!(job_id, error = %e, "Failed to increment run count");
            }
        }

        if let Err(e) = self
            .inner
            .catalog
            .set_state_unless_stopped(job_id, JobState::Waiting)
        {
            tracing::warn!(job_id, error = %e, "Failed to reset job to waiting");
        }
    }

    async fn stop_capped(&self, job_id: JobId) {
        tracing::info!(job_id, "Run-count cap reached; stopping job");
        if let Err(e) = self.inner.catalog.set_state(job_id, JobState::Stopped) {
            tracing::warn!(job_id, error = %e, "Failed to mark capped job stopped");
        }
        match self.remove(job_id).await {
            Ok(()) | Err(Error::NotScheduled { .. }) => {}
            Err(e) => tracing::warn!(job_id, error = %e, "Failed to unschedule capped job"),
        }
    }

    /// Register a wrapper task, reaping already-finished ones on the way.
    async fn track(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        let mut wrappers = self.inner.wrappers.lock().await;
        while let Some(finished) = wrappers.try_join_next() {
            if let Err(e) = finished {
                if e.is_panic() {
                    tracing::error!("Wrapper task panicked");
                }
            }
        }
        wrappers.spawn(task);
    }

    async fn drain_wrappers(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut wrappers = self.inner.wrappers.lock().await;
        loop {
            if wrappers.is_empty() {
                return;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tracing::error!(
                    pending = wrappers.len(),
                    "Stop timed out; detaching in-flight invocations"
                );
                wrappers.detach_all();
                return;
            }
            match tokio::time::timeout(remaining, wrappers.join_next()).await {
                Ok(Some(Err(e))) if e.is_panic() => tracing::error!("Wrapper task panicked"),
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(_) => {
                    tracing::error!(
                        pending = wrappers.len(),
                        "Stop timed out; detaching in-flight invocations"
                    );
                    wrappers.detach_all();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::config::Settings;
    use crate::exec_log::ExecLogWriter;
    use crate::job::{ExecMode, NewJob};
    use crate::metrics::Metrics;
    use crate::registry::FunctionRegistry;

    struct Fixture {
        catalog: Arc<SqliteCatalog>,
        scheduler: Scheduler,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(settings: Settings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let config = ConfigHandle::new(settings);
        let metrics = Arc::new(Metrics::new());
        let executor = Arc::new(Executor::new(
            Arc::new(FunctionRegistry::with_builtins()),
            config.clone(),
            metrics,
            Arc::new(ExecLogWriter::new(dir.path())),
        ));
        let scheduler = Scheduler::new(
            catalog.clone(),
            executor,
            Arc::new(GateMap::new()),
            config,
        );
        Fixture {
            catalog,
            scheduler,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Settings::default())
    }

    fn command_job(name: &str, command: &str) -> NewJob {
        NewJob {
            name: name.to_string(),
            cron_expr: "@every 1h".to_string(),
            mode: ExecMode::Command,
            command: command.to_string(),
            ..NewJob::default()
        }
    }

    #[tokio::test]
    async fn add_rejects_invalid_cron() {
        let f = fixture();
        let mut job = f.catalog.create(command_job("bad", "true")).unwrap();
        job.cron_expr = "nope".to_string();
        assert!(matches!(
            f.scheduler.add(&job).await,
            Err(Error::InvalidCron { .. })
        ));
        assert!(f.scheduler.entries().await.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_entry_is_not_scheduled() {
        let f = fixture();
        assert!(matches!(
            f.scheduler.remove(77).await,
            Err(Error::NotScheduled { id: 77 })
        ));
    }

    #[tokio::test]
    async fn entries_snapshot_is_in_insertion_order() {
        let f = fixture();
        let a = f.catalog.create(command_job("a", "true")).unwrap();
        let b = f.catalog.create(command_job("b", "true")).unwrap();
        f.scheduler.add(&a).await.unwrap();
        f.scheduler.add(&b).await.unwrap();

        let ids: Vec<JobId> = f.scheduler.entries().await.iter().map(|e| e.job_id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn update_entry_replaces_schedule_without_duplicates() {
        let f = fixture();
        let mut job = f.catalog.create(command_job("edit", "true")).unwrap();
        f.scheduler.add(&job).await.unwrap();

        job.cron_expr = "@every 2h".to_string();
        f.scheduler.update_entry(&job).await.unwrap();

        let entries = f.scheduler.entries().await;
        assert_eq!(entries.len(), 1);
        let next = entries[0].next_fire;
        let expected = Local::now() + chrono::Duration::hours(2);
        assert!((expected - next).num_seconds().abs() < 5);
    }

    #[tokio::test]
    async fn start_and_stop_flip_running() {
        let f = fixture();
        assert!(!f.scheduler.is_running());
        f.scheduler.start();
        assert!(f.scheduler.is_running());
        f.scheduler.stop(Duration::from_secs(5)).await;
        assert!(!f.scheduler.is_running());
    }

    #[tokio::test]
    async fn fire_executes_and_increments_run_count() {
        let f = fixture();
        let job = f.catalog.create(command_job("count", "echo hi")).unwrap();
        f.scheduler.fire(job.id, "exec-1", ExecSource::Cron).await;

        let after = f.catalog.get(job.id).unwrap().unwrap();
        assert_eq!(after.run_count, 1);
        assert_eq!(after.state, JobState::Waiting);
    }

    #[tokio::test]
    async fn fire_stops_job_at_cap_and_removes_entry() {
        let f = fixture();
        let job = f
            .catalog
            .create(NewJob {
                max_run_count: 1,
                ..command_job("capped", "echo hi")
            })
            .unwrap();
        f.scheduler.add(&job).await.unwrap();

        f.scheduler.fire(job.id, "exec-1", ExecSource::Cron).await;

        let after = f.catalog.get(job.id).unwrap().unwrap();
        assert_eq!(after.run_count, 1);
        assert_eq!(after.state, JobState::Stopped);
        assert!(f.scheduler.entries().await.is_empty());

        // A stale fire after the cap is a no-op.
        f.scheduler.fire(job.id, "exec-2", ExecSource::Cron).await;
        assert_eq!(f.catalog.get(job.id).unwrap().unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn fire_on_deleted_job_is_a_noop() {
        let f = fixture();
        let job = f.catalog.create(command_job("ghost", "echo hi")).unwrap();
        f.catalog.delete(job.id).unwrap();
        // Must not panic or recreate anything.
        f.scheduler.fire(job.id, "exec-1", ExecSource::Cron).await;
    }

    #[tokio::test]
    async fn manual_run_unknown_job_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.scheduler.run_manually(123).await,
            Err(Error::NotFound { id: 123 })
        ));
    }

    #[tokio::test]
    async fn manual_run_returns_fresh_exec_id() {
        let f = fixture();
        let job = f.catalog.create(command_job("manual", "echo hi")).unwrap();
        let run = f.scheduler.run_manually(job.id).await.unwrap();
        assert!(!run.skipped);
        assert!(run.exec_id.is_some());
        f.scheduler.stop(Duration::from_secs(5)).await;
        assert_eq!(f.catalog.get(job.id).unwrap().unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn manual_skip_policy_skips_while_gate_is_held() {
        let f = fixture_with(Settings {
            manual_allow_concurrent: false,
            ..Settings::default()
        });
        let job = f
            .catalog
            .create(NewJob {
                allow_mode: AllowMode::Skip,
                ..command_job("skip", "echo hi")
            })
            .unwrap();

        // Hold the gate as if a previous invocation were still running.
        let admission = f
            .scheduler
            .inner
            .gates
            .admit(job.id, AllowMode::Skip, 64)
            .await;
        let Admission::Run(permit) = admission else {
            panic!("gate must be free initially");
        };

        let run = f.scheduler.run_manually(job.id).await.unwrap();
        assert!(run.skipped);
        assert!(run.exec_id.is_none());
        assert!(run.reason.as_deref().unwrap().contains("still running"));

        drop(permit);
        let run = f.scheduler.run_manually(job.id).await.unwrap();
        assert!(!run.skipped);
        f.scheduler.stop(Duration::from_secs(5)).await;
    }

    /// `skipped=true` is only possible under the Skip policy: Queue-policy
    /// manual runs delay instead, even when the scheduled-fire waiter cap is
    /// already exhausted.
    #[tokio::test]
    async fn manual_queue_policy_never_skips_even_over_the_waiter_cap() {
        let f = fixture_with(Settings {
            manual_allow_concurrent: false,
            queue_max_waiters: 0,
            ..Settings::default()
        });
        let job = f
            .catalog
            .create(NewJob {
                allow_mode: AllowMode::Queue,
                ..command_job("queued", "echo hi")
            })
            .unwrap();

        // Hold the gate so both manual runs have to queue behind it.
        let permit = match f
            .scheduler
            .inner
            .gates
            .admit(job.id, AllowMode::Skip, 64)
            .await
        {
            Admission::Run(p) => p,
            _ => panic!("gate must be free initially"),
        };

        let first = f.scheduler.run_manually(job.id).await.unwrap();
        let second = f.scheduler.run_manually(job.id).await.unwrap();
        assert!(!first.skipped, "queue-policy manual runs are never skipped");
        assert!(!second.skipped, "queue-policy manual runs are never skipped");
        assert!(first.exec_id.is_some() && second.exec_id.is_some());

        drop(permit);
        f.scheduler.stop(Duration::from_secs(10)).await;
        assert_eq!(f.catalog.get(job.id).unwrap().unwrap().run_count, 2);
    }

    #[tokio::test]
    async fn manual_concurrent_override_ignores_skip_policy() {
        let f = fixture(); // manual_allow_concurrent defaults to true
        let job = f
            .catalog
            .create(NewJob {
                allow_mode: AllowMode::Skip,
                ..command_job("override", "echo hi")
            })
            .unwrap();

        let _permit = match f
            .scheduler
            .inner
            .gates
            .admit(job.id, AllowMode::Skip, 64)
            .await
        {
            Admission::Run(p) => p,
            _ => panic!("gate must be free initially"),
        };

        let run = f.scheduler.run_manually(job.id).await.unwrap();
        assert!(!run.skipped, "global override bypasses the gate");
        f.scheduler.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn global_default_allow_mode_applies_to_parallel_jobs() {
        let f = fixture_with(Settings {
            default_allow_mode: AllowMode::Skip,
            ..Settings::default()
        });
        assert_eq!(
            f.scheduler.resolve_policy(AllowMode::Parallel),
            AllowMode::Skip
        );
        assert_eq!(f.scheduler.resolve_policy(AllowMode::Queue), AllowMode::Queue);
    }
}
