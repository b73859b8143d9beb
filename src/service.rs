//! Caller-facing facade wiring the catalog, scheduler, gates, executor,
//! log writer and metrics together.
//!
//! Every catalog mutation keeps the scheduler in lockstep (validate first,
//! persist, then synchronize the entry table), which is what maintains the
//! invariant that a job is scheduled iff it exists with a non-Stopped state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{JobFilter, JobStore, Page};
use crate::config::{ConfigHandle, Settings};
use crate::cron_expr;
use crate::error::{Error, Result};
use crate::exec_log::ExecLogWriter;
use crate::executor::Executor;
use crate::gate::GateMap;
use crate::job::{Job, JobId, JobPatch, JobState, NewJob};
use crate::metrics::Metrics;
use crate::reconcile::{reconcile, ReconcileReport};
use crate::registry::FunctionRegistry;
use crate::scheduler::{ManualRun, Scheduler};

pub struct JobService {
    catalog: Arc<dyn JobStore>,
    scheduler: Scheduler,
    config: ConfigHandle,
    registry: Arc<FunctionRegistry>,
    metrics: Arc<Metrics>,
    exec_log: Arc<ExecLogWriter>,
}

impl JobService {
    pub fn new(
        catalog: Arc<dyn JobStore>,
        settings: Settings,
        runtime_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_registry(
            catalog,
            settings,
            runtime_dir,
            Arc::new(FunctionRegistry::with_builtins()),
        )
    }

    /// Construction seam for callers that register their own functions.
    pub fn with_registry(
        catalog: Arc<dyn JobStore>,
        settings: Settings,
        runtime_dir: impl Into<PathBuf>,
        registry: Arc<FunctionRegistry>,
    ) -> Self {
        let config = ConfigHandle::new(settings);
        let metrics = Arc::new(Metrics::new());
        let exec_log = Arc::new(ExecLogWriter::new(runtime_dir));
        let executor = Arc::new(Executor::new(
            registry.clone(),
            config.clone(),
            metrics.clone(),
            exec_log.clone(),
        ));
        let scheduler = Scheduler::new(
            catalog.clone(),
            executor,
            Arc::new(GateMap::new()),
            config.clone(),
        );
        Self {
            catalog,
            scheduler,
            config,
            registry,
            metrics,
            exec_log,
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Validate, persist, then schedule (unless created Stopped).
    pub async fn create_job(&self, new: NewJob) -> Result<Job> {
        cron_expr::validate(&new.cron_expr)?;
        let job = self.catalog.create(new)?;
        if job.state.is_enabled() {
            self.scheduler.add(&job).await?;
        }
        Ok(job)
    }

    pub fn get_job(&self, id: JobId) -> Result<Job> {
        self.catalog.get(id)?.ok_or(Error::NotFound { id })
    }

    pub fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        self.catalog.list(filter, page)
    }

    /// Persist the patch and re-align the scheduler entry: enabled jobs get
    /// an atomic entry swap, stopped jobs are unscheduled.
    pub async fn update_job(&self, id: JobId, patch: JobPatch) -> Result<Job> {
        if let Some(expr) = &patch.cron_expr {
            cron_expr::validate(expr)?;
        }
        let job = self.catalog.update(id, patch)?;
        if job.state.is_enabled() {
            self.scheduler.update_entry(&job).await?;
        } else {
            self.unschedule_quietly(id).await;
        }
        Ok(job)
    }

    pub async fn delete_job(&self, id: JobId) -> Result<()> {
        self.catalog.delete(id)?;
        self.unschedule_quietly(id).await;
        Ok(())
    }

    /// Operator state transition (enable / disable).
    pub async fn set_job_state(&self, id: JobId, state: JobState) -> Result<Job> {
        self.catalog.set_state(id, state)?;
        let job = self.get_job(id)?;
        if job.state.is_enabled() {
            self.scheduler.update_entry(&job).await?;
        } else {
            self.unschedule_quietly(id).await;
        }
        Ok(job)
    }

    /// Run a job once, outside its schedule. See [`Scheduler::run_manually`].
    pub async fn run_manually(&self, id: JobId) -> Result<ManualRun> {
        self.scheduler.run_manually(id).await
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        reconcile(&self.catalog, &self.scheduler).await
    }

    /// Schedule every enabled job from the catalog. Jobs found at or over
    /// their run-count cap are stopped instead of scheduled; the counter is
    /// deliberately left untouched.
    pub async fn load_enabled(&self) -> Result<usize> {
        let mut loaded = 0;
        for job in self.catalog.load_enabled()? {
            if job.cap_reached() {
                tracing::warn!(job_id = job.id, name = %job.name, "Job at run-count cap on load; stopping");
                if let Err(e) = self.catalog.set_state(job.id, JobState::Stopped) {
                    tracing::error!(job_id = job.id, error = %e, "Failed to stop capped job");
                }
                continue;
            }
            match self.scheduler.add(&job).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::error!(job_id = job.id, name = %job.name, error = %e, "Skipping unschedulable job");
                }
            }
        }
        Ok(loaded)
    }

    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Graceful shutdown: stop the tick loop, wait for wrapper invocations
    /// up to `timeout`, then close the log handle cache.
    pub async fn stop(&self, timeout: Duration) {
        self.scheduler.stop(timeout).await;
        self.exec_log.close_all();
    }

    async fn unschedule_quietly(&self, id: JobId) {
        match self.scheduler.remove(id).await {
            Ok(()) | Err(Error::NotScheduled { .. }) => {}
            Err(e) => tracing::warn!(job_id = id, error = %e, "Failed to unschedule job"),
        }
    }
}
