//! # cronwheel
//!
//! Durable single-node cron job scheduler.
//!
//! ## Features
//!
//! - Job definitions stored in a SQLite catalog — the scheduler entry table
//!   is kept in lockstep with it and can be re-aligned on demand.
//! - Cron dialects: 6-field with seconds, classic 5-field, `@hourly`-family
//!   shorthands, and `@every <duration>` intervals.
//! - Three execution modes: platform-shell commands, outbound HTTP calls,
//!   and registered in-process functions.
//! - Per-job concurrency policy: parallel, skip-if-running, queue-if-running.
//!   Manual runs share the same per-job gate, with an optional global
//!   override that always runs them in parallel.
//! - Bounded repetition: per-execution `times`/`interval` retries and a
//!   `max_run_count` cap that stops the job once reached.
//! - One JSON summary line per execution under
//!   `runtime/jobs/<id>/<YYYY>/<MM>/<DD>.log`, plus Prometheus metrics.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cronwheel::{ExecMode, JobService, NewJob, Settings, SqliteCatalog};
//!
//! #[tokio::main]
//! async fn main() -> cronwheel::Result<()> {
//!     let catalog = Arc::new(SqliteCatalog::open("data/cronwheel.db")?);
//!     let service = JobService::new(catalog, Settings::default(), "runtime");
//!
//!     service.create_job(NewJob {
//!         name: "heartbeat".to_string(),
//!         cron_expr: "*/30 * * * * *".to_string(),
//!         mode: ExecMode::Command,
//!         command: "echo alive".to_string(),
//!         ..NewJob::default()
//!     }).await?;
//!
//!     service.load_enabled().await?;
//!     service.start();
//!     // ... serve until shutdown ...
//!     service.stop(cronwheel::STOP_TIMEOUT).await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod cron_expr;
pub mod error;
pub mod exec_log;
pub mod executor;
pub mod gate;
pub mod job;
pub mod metrics;
pub mod payload;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use catalog::{JobFilter, JobStore, Page, SqliteCatalog};
pub use config::{ConfigHandle, Settings};
pub use cron_expr::CronSchedule;
pub use error::{Error, Result};
pub use exec_log::{ExecLogWriter, ExecSource, ExecStatus, ExecutionRecord};
pub use executor::Executor;
pub use gate::GateMap;
pub use job::{AllowMode, ExecMode, Job, JobId, JobPatch, JobState, NewJob};
pub use metrics::Metrics;
pub use registry::FunctionRegistry;
pub use scheduler::{EntrySnapshot, ManualRun, Scheduler, STOP_TIMEOUT};
pub use service::JobService;
