//! Per-execution summary records and the day-rotated append-only writer.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::{ExecMode, JobId};

/// Timestamp layout used inside records: local wall clock, millisecond
/// precision.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_time(t: DateTime<Local>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Where an execution was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecSource {
    Cron,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Success,
    Failure,
}

/// One summary line per execution attempt, end-to-end. Write-once: produced
/// by the executor, owned on disk by [`ExecLogWriter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub exec_id: String,
    pub job_id: JobId,
    pub job_name: String,
    pub mode: ExecMode,
    pub source: ExecSource,
    pub start_time: String,
    pub end_time: String,
    pub status: ExecStatus,
    pub duration_ms: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_resp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub func_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func_result: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl ExecutionRecord {
    /// Skeleton record with timing and mode-specific fields still unset.
    pub fn new(
        exec_id: &str,
        job_id: JobId,
        job_name: &str,
        mode: ExecMode,
        source: ExecSource,
    ) -> Self {
        Self {
            exec_id: exec_id.to_string(),
            job_id,
            job_name: job_name.to_string(),
            mode,
            source,
            start_time: String::new(),
            end_time: String::new(),
            status: ExecStatus::Failure,
            duration_ms: 0,
            command: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            http_url: None,
            http_method: None,
            http_status: None,
            http_resp: None,
            func_name: None,
            func_args: None,
            func_result: None,
            error_msg: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }
}

/// Append-only JSONL writer under `<root>/jobs/<job_id>/<YYYY>/<MM>/<DD>.log`.
///
/// Open handles are cached per path and reused across executions on the same
/// day; a single write mutex serializes appends. New days get new paths
/// naturally, so there is no in-place rotation.
pub struct ExecLogWriter {
    root: PathBuf,
    handles: RwLock<HashMap<PathBuf, File>>,
    write_lock: Mutex<()>,
}

impl ExecLogWriter {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: runtime_dir.into(),
            handles: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Current log path for a job.
    pub fn log_path(&self, job_id: JobId, now: DateTime<Local>) -> PathBuf {
        self.root
            .join("jobs")
            .join(job_id.to_string())
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(format!("{}.log", now.format("%d")))
    }

    /// Append one record as a single JSON line.
    pub fn append(&self, record: &ExecutionRecord) -> Result<()> {
        let path = self.log_path(record.job_id, Local::now());
        self.ensure_handle(&path)?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _write_guard = self.write_lock.lock().expect("write lock poisoned");
        let handles = self.handles.read().expect("handle lock poisoned");
        let file = handles
            .get(&path)
            .expect("handle inserted by ensure_handle");
        // &File is Write; the cache keeps shared ownership.
        (&*file).write_all(line.as_bytes())?;
        Ok(())
    }

    /// Open (and cache) the file for `path`, creating parent directories on
    /// first use. Double-checked so concurrent first writes race safely.
    fn ensure_handle(&self, path: &Path) -> Result<()> {
        {
            let handles = self.handles.read().expect("handle lock poisoned");
            if handles.contains_key(path) {
                return Ok(());
            }
        }

        let mut handles = self.handles.write().expect("handle lock poisoned");
        if handles.contains_key(path) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        handles.insert(path.to_path_buf(), file);
        Ok(())
    }

    /// Close every cached handle. Called once on shutdown.
    pub fn close_all(&self) {
        self.handles.write().expect("handle lock poisoned").clear();
    }
}
