//! Durable job catalog backed by SQLite.
//!
//! All mutations hit the database before returning; nothing is cached in
//! memory, so every read observes fresh state. The store is behind the
//! [`JobStore`] trait so tests can substitute failing or instrumented
//! implementations.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::job::{AllowMode, ExecMode, Job, JobId, JobPatch, JobState, NewJob};

/// Listing filter; all fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub mode: Option<ExecMode>,
    pub name_like: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Catalog operations the scheduler and service depend on.
pub trait JobStore: Send + Sync {
    fn create(&self, new: NewJob) -> Result<Job>;
    fn get(&self, id: JobId) -> Result<Option<Job>>;
    fn list(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>>;
    fn update(&self, id: JobId, patch: JobPatch) -> Result<Job>;
    fn delete(&self, id: JobId) -> Result<()>;
    fn set_state(&self, id: JobId, state: JobState) -> Result<()>;
    /// Transition unless the job is already Stopped; silently does nothing
    /// otherwise (used when an execution finishes after an operator stop).
    fn set_state_unless_stopped(&self, id: JobId, state: JobState) -> Result<()>;
    /// Server-side atomic increment; returns the new counter.
    fn increment_run_count(&self, id: JobId) -> Result<u64>;
    /// All jobs with state Waiting or Running, in id order.
    fn load_enabled(&self) -> Result<Vec<Job>>;
}

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("catalog lock poisoned")
    }
}

/// Idempotent; safe to run on every startup.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT NOT NULL,
            \"desc\"      TEXT NOT NULL DEFAULT '',
            cron_expr     TEXT NOT NULL,
            mode          TEXT NOT NULL,
            command       TEXT NOT NULL,
            state         INTEGER NOT NULL DEFAULT 0,
            allow_mode    INTEGER NOT NULL DEFAULT 0,
            max_run_count INTEGER NOT NULL DEFAULT 0,
            run_count     INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);",
    )?;
    Ok(())
}

const JOB_COLUMNS: &str =
    "id, name, \"desc\", cron_expr, mode, command, state, allow_mode, max_run_count, run_count, created_at, updated_at";

fn map_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        desc: row.get(2)?,
        cron_expr: row.get(3)?,
        mode: parse_column(row, 4, |s: String| s.parse::<ExecMode>())?,
        command: row.get(5)?,
        state: parse_column(row, 6, |v: i64| JobState::try_from(v))?,
        allow_mode: parse_column(row, 7, |v: i64| AllowMode::try_from(v))?,
        max_run_count: row.get::<_, i64>(8)? as u64,
        run_count: row.get::<_, i64>(9)? as u64,
        created_at: parse_column(row, 10, |s: String| parse_timestamp(&s))?,
        updated_at: parse_column(row, 11, |s: String| parse_timestamp(&s))?,
    })
}

fn parse_column<I, O>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: impl FnOnce(I) -> std::result::Result<O, String>,
) -> rusqlite::Result<O>
where
    I: rusqlite::types::FromSql,
{
    let raw: I = row.get(idx)?;
    parse(raw).map_err(|msg| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
        )
    })
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Local>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| format!("bad timestamp '{s}': {e}"))
}

fn now_rfc3339() -> String {
    Local::now().to_rfc3339()
}

impl JobStore for SqliteCatalog {
    fn create(&self, new: NewJob) -> Result<Job> {
        let conn = self.lock();
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO jobs (name, \"desc\", cron_expr, mode, command, state, allow_mode, max_run_count, run_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
            params![
                new.name,
                new.desc,
                new.cron_expr,
                new.mode.as_str(),
                new.command,
                new.state as i64,
                new.allow_mode as i64,
                new.max_run_count as i64,
                now,
            ],
        )
        .map_err(map_constraint)?;
        let id = conn.last_insert_rowid();
        get_row(&conn, id)?.ok_or(Error::NotFound { id })
    }

    fn get(&self, id: JobId) -> Result<Option<Job>> {
        get_row(&self.lock(), id)
    }

    fn list(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        let conn = self.lock();
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs");
        let mut clauses: Vec<&str> = Vec::new();
        let mut bind: Vec<Value> = Vec::new();

        if let Some(state) = filter.state {
            clauses.push("state = ?");
            bind.push(Value::Integer(state as i64));
        }
        if let Some(mode) = filter.mode {
            clauses.push("mode = ?");
            bind.push(Value::Text(mode.as_str().to_string()));
        }
        if let Some(like) = &filter.name_like {
            clauses.push("name LIKE ?");
            bind.push(Value::Text(format!("%{like}%")));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id LIMIT ? OFFSET ?");
        bind.push(Value::Integer(page.limit as i64));
        bind.push(Value::Integer(page.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind), map_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    fn update(&self, id: JobId, patch: JobPatch) -> Result<Job> {
        let conn = self.lock();
        if patch.is_empty() {
            // No-op update: leave the row (and updated_at) untouched.
            return get_row(&conn, id)?.ok_or(Error::NotFound { id });
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut bind: Vec<Value> = Vec::new();
        if let Some(name) = patch.name {
            sets.push("name = ?");
            bind.push(Value::Text(name));
        }
        if let Some(desc) = patch.desc {
            sets.push("\"desc\" = ?");
            bind.push(Value::Text(desc));
        }
        if let Some(cron_expr) = patch.cron_expr {
            sets.push("cron_expr = ?");
            bind.push(Value::Text(cron_expr));
        }
        if let Some(mode) = patch.mode {
            sets.push("mode = ?");
            bind.push(Value::Text(mode.as_str().to_string()));
        }
        if let Some(command) = patch.command {
            sets.push("command = ?");
            bind.push(Value::Text(command));
        }
        if let Some(state) = patch.state {
            sets.push("state = ?");
            bind.push(Value::Integer(state as i64));
        }
        if let Some(allow_mode) = patch.allow_mode {
            sets.push("allow_mode = ?");
            bind.push(Value::Integer(allow_mode as i64));
        }
        if let Some(max_run_count) = patch.max_run_count {
            sets.push("max_run_count = ?");
            bind.push(Value::Integer(max_run_count as i64));
        }
        sets.push("updated_at = ?");
        bind.push(Value::Text(now_rfc3339()));
        bind.push(Value::Integer(id));

        let sql = format!("UPDATE jobs SET {} WHERE id = ?", sets.join(", "));
        let affected = conn.execute(&sql, params_from_iter(bind))?;
        if affected == 0 {
            return Err(Error::NotFound { id });
        }
        get_row(&conn, id)?.ok_or(Error::NotFound { id })
    }

    fn delete(&self, id: JobId) -> Result<()> {
        let affected = self.lock().execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(Error::NotFound { id });
        }
        Ok(())
    }

    fn set_state(&self, id: JobId, state: JobState) -> Result<()> {
        let affected = self.lock().execute(
            "UPDATE jobs SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state as i64, now_rfc3339(), id],
        )?;
        if affected == 0 {
            return Err(Error::NotFound { id });
        }
        Ok(())
    }

    fn set_state_unless_stopped(&self, id: JobId, state: JobState) -> Result<()> {
        self.lock().execute(
            "UPDATE jobs SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state <> ?4",
            params![state as i64, now_rfc3339(), id, JobState::Stopped as i64],
        )?;
        Ok(())
    }

    fn increment_run_count(&self, id: JobId) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "UPDATE jobs SET run_count = run_count + 1, updated_at = ?1 WHERE id = ?2
                 RETURNING run_count",
                params![now_rfc3339(), id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::NotFound { id },
                other => Error::Persistence(other),
            })?;
        Ok(count as u64)
    }

    fn load_enabled(&self) -> Result<Vec<Job>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state IN (?1, ?2) ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![JobState::Waiting as i64, JobState::Running as i64],
            map_job,
        )?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }
}

fn get_row(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], map_job)
        .optional()?)
}

fn map_constraint(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Duplicate(e.to_string())
        }
        _ => Error::Persistence(e),
    }
}
