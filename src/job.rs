use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Catalog-assigned job identifier, stable for the lifetime of the job.
pub type JobId = i64;

/// What the `command` body of a job means and which runner executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    Command,
    Http,
    #[serde(alias = "func")]
    Function,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Http => "http",
            Self::Function => "function",
        }
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "command" => Ok(Self::Command),
            "http" => Ok(Self::Http),
            "function" | "func" => Ok(Self::Function),
            other => Err(format!("unknown exec mode: {other}")),
        }
    }
}

/// Job lifecycle state. Waiting and Running are "enabled" and belong in the
/// scheduler; Stopped must never be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting = 0,
    Running = 1,
    Stopped = 2,
}

impl JobState {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl TryFrom<i64> for JobState {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Running),
            2 => Ok(Self::Stopped),
            other => Err(format!("invalid job state: {other}")),
        }
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        Self::try_from(v as i64).map_err(serde::de::Error::custom)
    }
}

/// Per-job concurrency policy applied when a fire arrives while a previous
/// invocation of the same job is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowMode {
    /// No gate; invocations overlap freely.
    Parallel = 0,
    /// Drop the new invocation.
    Skip = 1,
    /// Wait for the previous invocation to finish, then run.
    Queue = 2,
}

impl TryFrom<i64> for AllowMode {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Parallel),
            1 => Ok(Self::Skip),
            2 => Ok(Self::Queue),
            other => Err(format!("invalid allow mode: {other}")),
        }
    }
}

impl Serialize for AllowMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for AllowMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        Self::try_from(v as i64).map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for AllowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "parallel" => Ok(Self::Parallel),
            "1" | "skip" => Ok(Self::Skip),
            "2" | "queue" => Ok(Self::Queue),
            other => Err(format!("unknown allow mode: {other}")),
        }
    }
}

/// Durable job definition, one row per scheduled workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub desc: String,
    pub cron_expr: String,
    pub mode: ExecMode,
    /// Mode-dependent body in the line-oriented tag grammar.
    pub command: String,
    pub state: JobState,
    pub allow_mode: AllowMode,
    /// 0 means unbounded.
    pub max_run_count: u64,
    /// Count of completed executions, success or failure.
    pub run_count: u64,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl Job {
    /// True once a bounded job has used up its execution budget.
    pub fn cap_reached(&self) -> bool {
        self.max_run_count > 0 && self.run_count >= self.max_run_count
    }
}

/// Input for `JobStore::create`. The catalog assigns id, counters and
/// timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub desc: String,
    pub cron_expr: String,
    pub mode: ExecMode,
    pub command: String,
    pub state: JobState,
    pub allow_mode: AllowMode,
    pub max_run_count: u64,
}

impl Default for NewJob {
    fn default() -> Self {
        Self {
            name: String::new(),
            desc: String::new(),
            cron_expr: String::new(),
            mode: ExecMode::Command,
            command: String::new(),
            state: JobState::Waiting,
            allow_mode: AllowMode::Parallel,
            max_run_count: 0,
        }
    }
}

/// Partial update for `JobStore::update`. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub cron_expr: Option<String>,
    pub mode: Option<ExecMode>,
    pub command: Option<String>,
    pub state: Option<JobState>,
    pub allow_mode: Option<AllowMode>,
    pub max_run_count: Option<u64>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.desc.is_none()
            && self.cron_expr.is_none()
            && self.mode.is_none()
            && self.command.is_none()
            && self.state.is_none()
            && self.allow_mode.is_none()
            && self.max_run_count.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_mode_round_trips_through_json() {
        let json = serde_json::to_string(&ExecMode::Function).unwrap();
        assert_eq!(json, "\"function\"");
        let back: ExecMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExecMode::Function);
    }

    #[test]
    fn exec_mode_accepts_func_alias() {
        let mode: ExecMode = serde_json::from_str("\"func\"").unwrap();
        assert_eq!(mode, ExecMode::Function);
    }

    #[test]
    fn job_state_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&JobState::Stopped).unwrap(), "2");
        let back: JobState = serde_json::from_str("1").unwrap();
        assert_eq!(back, JobState::Running);
    }

    #[test]
    fn job_state_rejects_unknown_integer() {
        assert!(serde_json::from_str::<JobState>("9").is_err());
    }

    #[test]
    fn allow_mode_from_str_accepts_names_and_digits() {
        assert_eq!("queue".parse::<AllowMode>().unwrap(), AllowMode::Queue);
        assert_eq!("1".parse::<AllowMode>().unwrap(), AllowMode::Skip);
        assert!("3".parse::<AllowMode>().is_err());
    }

    #[test]
    fn cap_reached_only_for_bounded_jobs() {
        let mut job = Job {
            id: 1,
            name: "n".into(),
            desc: String::new(),
            cron_expr: "* * * * * *".into(),
            mode: ExecMode::Command,
            command: "true".into(),
            state: JobState::Waiting,
            allow_mode: AllowMode::Parallel,
            max_run_count: 0,
            run_count: 100,
            created_at: Local::now(),
            updated_at: Local::now(),
        };
        assert!(!job.cap_reached(), "unbounded jobs never reach a cap");
        job.max_run_count = 100;
        assert!(job.cap_reached());
        job.run_count = 99;
        assert!(!job.cap_reached());
    }
}
