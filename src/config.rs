use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::job::AllowMode;

/// Typed read-only view of the job-system configuration.
///
/// Produced by whatever loads the configuration file (out of scope here) and
/// handed to the scheduler, gates and executor through a [`ConfigHandle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Applied when a job's own `allow_mode` is Parallel (0).
    pub default_allow_mode: AllowMode,
    /// When true, manual runs always execute in parallel regardless of the
    /// job's policy.
    pub manual_allow_concurrent: bool,
    /// Fallback per-attempt timeout for all three execution modes.
    pub default_timeout_seconds: u64,
    /// Stored HTTP response bodies are truncated beyond this many bytes.
    pub http_response_max_bytes: usize,
    /// Stored stdout/stderr/function results are truncated beyond this many
    /// bytes.
    pub log_line_truncate: usize,
    /// When false, execution summary records are not written to disk.
    pub log_summary_enabled: bool,
    /// Upper bound on Queue-policy waiters per job for scheduled fires;
    /// overflow drops the fire like a skip. Manual runs are not bounded.
    pub queue_max_waiters: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_allow_mode: AllowMode::Parallel,
            manual_allow_concurrent: true,
            default_timeout_seconds: 60,
            http_response_max_bytes: 1000,
            log_line_truncate: 1000,
            log_summary_enabled: true,
            queue_max_waiters: 64,
        }
    }
}

/// Cloneable handle over the current [`Settings`] snapshot.
///
/// `snapshot` hands out the Arc a running execution keeps for its whole
/// lifetime; `replace` swaps the snapshot atomically for subsequent readers.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<Settings>>>,
}

impl ConfigHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read().expect("config lock poisoned"))
    }

    pub fn replace(&self, settings: Settings) {
        *self.current.write().expect("config lock poisoned") = Arc::new(settings);
    }
}
