use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::job::{ExecMode, JobId};

const LABELS: &[&str] = &["job_id", "job_name", "mode"];

/// Execution metrics, owned registry. Whatever serves `/metrics` (out of
/// scope here) calls `encode()`.
pub struct Metrics {
    registry: Registry,

    jobs_exec_total: IntCounterVec,
    jobs_exec_fail_total: IntCounterVec,
    jobs_exec_duration_seconds: HistogramVec,
    jobs_running: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let jobs_exec_total = IntCounterVec::new(
            Opts::new("jobs_exec_total", "Total number of job executions"),
            LABELS,
        )
        .unwrap();
        registry.register(Box::new(jobs_exec_total.clone())).unwrap();

        let jobs_exec_fail_total = IntCounterVec::new(
            Opts::new(
                "jobs_exec_fail_total",
                "Total number of failed job executions",
            ),
            LABELS,
        )
        .unwrap();
        registry
            .register(Box::new(jobs_exec_fail_total.clone()))
            .unwrap();

        let jobs_exec_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "jobs_exec_duration_seconds",
                "Job execution duration in seconds",
            )
            .buckets(vec![0.1, 0.3, 1.0, 3.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            LABELS,
        )
        .unwrap();
        registry
            .register(Box::new(jobs_exec_duration_seconds.clone()))
            .unwrap();

        let jobs_running = IntGauge::new("jobs_running", "Current number of running jobs").unwrap();
        registry.register(Box::new(jobs_running.clone())).unwrap();

        Self {
            registry,
            jobs_exec_total,
            jobs_exec_fail_total,
            jobs_exec_duration_seconds,
            jobs_running,
        }
    }

    pub fn inc_exec(&self, job_id: JobId, job_name: &str, mode: ExecMode) {
        self.jobs_exec_total
            .with_label_values(&[&job_id.to_string(), job_name, mode.as_str()])
            .inc();
    }

    pub fn inc_fail(&self, job_id: JobId, job_name: &str, mode: ExecMode) {
        self.jobs_exec_fail_total
            .with_label_values(&[&job_id.to_string(), job_name, mode.as_str()])
            .inc();
    }

    pub fn observe_duration(&self, job_id: JobId, job_name: &str, mode: ExecMode, seconds: f64) {
        self.jobs_exec_duration_seconds
            .with_label_values(&[&job_id.to_string(), job_name, mode.as_str()])
            .observe(seconds);
    }

    pub fn running_inc(&self) {
        self.jobs_running.inc();
    }

    pub fn running_dec(&self) {
        self.jobs_running.dec();
    }

    pub fn running(&self) -> i64 {
        self.jobs_running.get()
    }

    /// Text exposition of all registered metrics.
    pub fn encode(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}
