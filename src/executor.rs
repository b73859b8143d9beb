//! Execution pipeline for the three job modes.
//!
//! `execute` always produces exactly one [`ExecutionRecord`], no matter what
//! the payload does: parse failures, spawn errors, timeouts and panics all
//! end up as Failure records instead of errors bubbling to the scheduler.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tokio::io::AsyncReadExt;

use crate::config::{ConfigHandle, Settings};
use crate::exec_log::{format_time, ExecLogWriter, ExecSource, ExecStatus, ExecutionRecord};
use crate::job::Job;
use crate::metrics::Metrics;
use crate::payload::{CommandSpec, FunctionSpec, HttpSpec, JobPayload};
use crate::registry::FunctionRegistry;

pub struct Executor {
    registry: Arc<FunctionRegistry>,
    config: ConfigHandle,
    metrics: Arc<Metrics>,
    exec_log: Arc<ExecLogWriter>,
}

impl Executor {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        config: ConfigHandle,
        metrics: Arc<Metrics>,
        exec_log: Arc<ExecLogWriter>,
    ) -> Self {
        Self {
            registry,
            config,
            metrics,
            exec_log,
        }
    }

    /// Run one invocation of `job` and return its summary record.
    ///
    /// The configuration snapshot is taken once here; a long execution keeps
    /// using it even if the config is reloaded mid-flight.
    pub async fn execute(&self, job: &Job, exec_id: &str, source: ExecSource) -> ExecutionRecord {
        let cfg = self.config.snapshot();
        let start = Local::now();
        self.metrics.running_inc();

        let mut record = ExecutionRecord::new(exec_id, job.id, &job.name, job.mode, source);
        record.start_time = format_time(start);

        match JobPayload::parse(job.mode, &job.command, &cfg) {
            Err(e) => {
                record.error_msg = Some(e.to_string());
            }
            Ok(JobPayload::Command(spec)) => self.run_command(&spec, &cfg, &mut record).await,
            Ok(JobPayload::Http(spec)) => self.run_http(&spec, &cfg, &mut record).await,
            Ok(JobPayload::Function(spec)) => self.run_function(&spec, &cfg, &mut record).await,
        }

        let end = Local::now();
        record.end_time = format_time(end);
        record.duration_ms = (end - start).num_milliseconds();

        self.metrics.inc_exec(job.id, &job.name, job.mode);
        if !record.is_success() {
            self.metrics.inc_fail(job.id, &job.name, job.mode);
        }
        self.metrics.observe_duration(
            job.id,
            &job.name,
            job.mode,
            record.duration_ms as f64 / 1000.0,
        );
        self.metrics.running_dec();

        if cfg.log_summary_enabled {
            if let Err(e) = self.exec_log.append(&record) {
                tracing::error!(job_id = job.id, error = %e, "Failed to write execution record");
            }
        }
        record
    }

    async fn run_command(&self, spec: &CommandSpec, cfg: &Settings, record: &mut ExecutionRecord) {
        record.command = Some(spec.command.clone());

        let attempts = spec.attempts();
        let mut stdout_agg = String::new();
        let mut stderr_agg = String::new();
        let mut last_exit: Option<i32> = None;
        let mut last_error: Option<String> = None;
        let mut any_success = false;

        for attempt in 1..=attempts {
            if attempts > 1 {
                stdout_agg.push_str(&format!("=== attempt {attempt}/{attempts} ===\n"));
            }
            let outcome = command_attempt(spec).await;
            stdout_agg.push_str(&outcome.stdout);
            if !outcome.stderr.is_empty() {
                if attempts > 1 {
                    stderr_agg.push_str(&format!("=== attempt {attempt}/{attempts} ===\n"));
                }
                stderr_agg.push_str(&outcome.stderr);
            }
            last_exit = outcome.exit_code;
            if outcome.success {
                any_success = true;
            } else if let Some(err) = outcome.error {
                last_error = Some(err);
            }

            if attempt < attempts && !spec.interval.is_zero() {
                tokio::time::sleep(spec.interval).await;
            }
        }

        record.exit_code = last_exit;
        record.stdout = some_nonempty(truncate_text(stdout_agg, cfg.log_line_truncate));
        record.stderr = some_nonempty(truncate_text(stderr_agg, cfg.log_line_truncate));
        if any_success {
            record.status = ExecStatus::Success;
        } else {
            record.error_msg = last_error.or_else(|| Some("command failed".to_string()));
        }
    }

    async fn run_http(&self, spec: &HttpSpec, cfg: &Settings, record: &mut ExecutionRecord) {
        record.http_url = Some(spec.url.clone());
        record.http_method = Some(spec.method.clone());

        let client = match build_http_client(spec) {
            Ok(client) => client,
            Err(e) => {
                record.error_msg = Some(e);
                return;
            }
        };

        let attempts = spec.attempts();
        let mut body_agg = String::new();
        let mut last_status: Option<u16> = None;
        let mut last_error: Option<String> = None;
        let mut any_success = false;

        for attempt in 1..=attempts {
            if attempts > 1 {
                body_agg.push_str(&format!("=== attempt {attempt}/{attempts} ===\n"));
            }
            let outcome = http_attempt(&client, spec, cfg, attempt == 1).await;
            body_agg.push_str(&outcome.text);
            if outcome.status.is_some() {
                last_status = outcome.status;
            }
            if outcome.success {
                any_success = true;
            } else if let Some(err) = outcome.error {
                last_error = Some(err);
            }

            if attempt < attempts && !spec.interval.is_zero() {
                tokio::time::sleep(spec.interval).await;
            }
        }

        record.http_status = last_status;
        record.http_resp = Some(body_agg);
        if any_success {
            record.status = ExecStatus::Success;
        } else {
            record.error_msg = last_error.or_else(|| {
                last_status.map(|s| format!("last attempt returned HTTP {s}"))
            });
        }
    }

    async fn run_function(&self, spec: &FunctionSpec, cfg: &Settings, record: &mut ExecutionRecord) {
        record.func_name = Some(spec.name.clone());
        record.func_args = Some(spec.args.clone());

        let Some(func) = self.registry.resolve(&spec.name) else {
            record.error_msg = Some(format!("function not found: {}", spec.name));
            return;
        };

        let attempts = spec.attempts();
        let mut result_agg = String::new();
        let mut last_error: Option<String> = None;
        let mut any_success = false;

        for attempt in 1..=attempts {
            if attempts > 1 {
                result_agg.push_str(&format!("=== attempt {attempt}/{attempts} ===\n"));
            }
            let func = Arc::clone(&func);
            let args = spec.args.clone();
            // spawn_blocking keeps user code off the async workers and turns
            // panics into a JoinError we can fold into the record.
            let call = tokio::task::spawn_blocking(move || func(&args));
            match tokio::time::timeout(spec.timeout, call).await {
                Ok(Ok(Ok(result))) => {
                    result_agg.push_str(&result);
                    any_success = true;
                }
                Ok(Ok(Err(msg))) => {
                    result_agg.push_str(&format!("[attempt {attempt}] error: {msg}\n"));
                    last_error = Some(msg);
                }
                Ok(Err(join_err)) => {
                    let msg = panic_message(join_err);
                    result_agg.push_str(&format!("[attempt {attempt}] panic: {msg}\n"));
                    last_error = Some(format!("function panicked: {msg}"));
                }
                Err(_) => {
                    // The blocking call keeps running; we only stop waiting.
                    let msg = format!(
                        "function execution timeout after {}s",
                        spec.timeout.as_secs()
                    );
                    result_agg.push_str(&format!("[attempt {attempt}] {msg}\n"));
                    last_error = Some(msg);
                }
            }

            if attempt < attempts && !spec.interval.is_zero() {
                tokio::time::sleep(spec.interval).await;
            }
        }

        record.func_result = some_nonempty(truncate_text(result_agg, cfg.log_line_truncate));
        if any_success {
            record.status = ExecStatus::Success;
        } else {
            record.error_msg = last_error;
        }
    }
}

struct CommandAttempt {
    success: bool,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    error: Option<String>,
}

async fn command_attempt(spec: &CommandSpec) -> CommandAttempt {
    let mut cmd = shell_command(&spec.command);
    if let Some(dir) = &spec.workdir {
        cmd.current_dir(dir);
    }
    for entry in &spec.env {
        if let Some((key, value)) = entry.split_once('=') {
            cmd.env(key, value);
        }
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandAttempt {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                error: Some(format!("failed to spawn shell: {e}")),
            };
        }
    };

    let mut out_pipe = child.stdout.take().expect("stdout is piped");
    let mut err_pipe = child.stderr.take().expect("stderr is piped");
    let out_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = out_pipe.read_to_end(&mut buf).await;
        buf
    });
    let err_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = err_pipe.read_to_end(&mut buf).await;
        buf
    });

    let (status, error) = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => (Some(status), None),
        Ok(Err(e)) => (None, Some(format!("process wait error: {e}"))),
        Err(_) => {
            kill_gracefully(&mut child, &spec.command, spec.timeout.as_secs()).await;
            (
                None,
                Some(format!(
                    "process timed out after {}s",
                    spec.timeout.as_secs()
                )),
            )
        }
    };

    // The pipes close once the child is gone, so these finish even after a kill.
    let stdout = decode_output(out_task.await.unwrap_or_default());
    let stderr = decode_output(err_task.await.unwrap_or_default());

    match status {
        Some(status) => {
            let code = status.code().unwrap_or(-1);
            if status.success() {
                CommandAttempt {
                    success: true,
                    exit_code: Some(code),
                    stdout,
                    stderr,
                    error: None,
                }
            } else {
                CommandAttempt {
                    success: false,
                    exit_code: Some(code),
                    stdout,
                    stderr,
                    error: Some(format!("process exited with status {code}")),
                }
            }
        }
        None => CommandAttempt {
            success: false,
            exit_code: None,
            stdout,
            stderr,
            error,
        },
    }
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Send SIGTERM and wait up to 5 s for a clean exit; escalate to SIGKILL if
/// needed. On non-Unix platforms SIGTERM is not available, so we go straight
/// to the kill.
async fn kill_gracefully(child: &mut tokio::process::Child, command: &str, timeout_sec: u64) {
    tracing::warn!(command, timeout_sec, "Process timed out, terminating");

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill as nix_kill, Signal};
        use nix::unistd::Pid;
        let _ = nix_kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(_) => return,
            Err(_) => tracing::warn!(command, "SIGTERM ignored, escalating to SIGKILL"),
        }
    }

    let _ = child.start_kill();
    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(command, error = %e, "Error waiting for killed process"),
        Err(_) => tracing::error!(command, "Process still alive 5 s after SIGKILL"),
    }
}

/// Valid UTF-8 passes through; on Windows non-UTF-8 bytes get a GBK decode
/// attempt; anything else is replaced lossily.
fn decode_output(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            #[cfg(windows)]
            {
                let (decoded, _, had_errors) = encoding_rs::GBK.decode(&bytes);
                if !had_errors {
                    return decoded.into_owned();
                }
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

struct HttpAttempt {
    status: Option<u16>,
    text: String,
    success: bool,
    error: Option<String>,
}

fn build_http_client(spec: &HttpSpec) -> Result<reqwest::Client, String> {
    let mut builder = reqwest::Client::builder().timeout(spec.timeout);
    if let Some(proxy_url) = &spec.proxy {
        // The URL scheme picks the transport: socks5:// and socks5h:// go
        // through SOCKS, anything else is treated as an HTTP(S) proxy.
        let proxy = reqwest::Proxy::all(proxy_url.as_str())
            .map_err(|e| format!("invalid proxy '{proxy_url}': {e}"))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}

async fn http_attempt(
    client: &reqwest::Client,
    spec: &HttpSpec,
    cfg: &Settings,
    include_headers: bool,
) -> HttpAttempt {
    let method = parse_method(&spec.method);
    let mut req = client.request(method.clone(), &spec.url);
    for (key, value) in &spec.headers {
        req = req.header(key.as_str(), value.as_str());
    }
    if let Some(cookies) = &spec.cookies {
        req = req.header(reqwest::header::COOKIE, cookies.as_str());
    }
    if matches!(method, Method::POST | Method::PUT) {
        if let Some(data) = &spec.data {
            req = req.body(data.clone());
        }
    }

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            return HttpAttempt {
                status: None,
                text: format!("request error: {e}\n"),
                success: false,
                error: Some(e.to_string()),
            };
        }
    };

    let status = resp.status();
    let mut text = format!("status: {status}\n");
    if include_headers && !resp.headers().is_empty() {
        text.push_str("headers:\n");
        for (name, value) in resp.headers() {
            text.push_str(&format!("  {name}: {}\n", value.to_str().unwrap_or("<binary>")));
        }
    }

    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            text.push_str(&format!("body read error: {e}\n"));
            return HttpAttempt {
                status: Some(status.as_u16()),
                text,
                success: false,
                error: Some(e.to_string()),
            };
        }
    };
    let body = decode_body(&bytes, content_type.as_deref());

    // The substring match runs against the full body; only the stored copy
    // is truncated.
    let matched = spec
        .result
        .as_ref()
        .map(|needle| body.contains(needle.as_str()));
    let success = status.is_success() || matched == Some(true);

    text.push_str("body:\n");
    text.push_str(&truncate_text(body, cfg.http_response_max_bytes));
    text.push('\n');
    if let Some(needle) = &spec.result {
        let verdict = if matched == Some(true) { "found" } else { "not found" };
        text.push_str(&format!("result match '{needle}': {verdict}\n"));
    }

    HttpAttempt {
        status: Some(status.as_u16()),
        text,
        success,
        error: None,
    }
}

fn parse_method(method: &str) -> Method {
    match method {
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        _ => Method::GET,
    }
}

/// `charset=` parameter of a Content-Type header, lowercased.
fn charset_of(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let idx = lower.find("charset=")?;
    let raw = &content_type[idx + "charset=".len()..];
    let end = raw.find(';').unwrap_or(raw.len());
    let charset = raw[..end].trim().trim_matches(|c| c == '"' || c == '\'');
    if charset.is_empty() {
        None
    } else {
        Some(charset.to_ascii_lowercase())
    }
}

fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let charset = content_type.and_then(charset_of);
    if let Some(charset) = charset {
        match charset.as_str() {
            "utf-8" | "utf8" => return decode_output(bytes.to_vec()),
            #[cfg(windows)]
            "gbk" | "gb2312" => {
                let (decoded, _, had_errors) = encoding_rs::GBK.decode(bytes);
                if !had_errors {
                    return decoded.into_owned();
                }
            }
            _ => {}
        }
    }
    decode_output(bytes.to_vec())
}

/// Cap `text` at `max` bytes (on a char boundary) with a visible marker.
/// A `max` of 0 disables truncation.
fn truncate_text(mut text: String, max: usize) -> String {
    if max == 0 || text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n... (truncated)");
    text
}

fn some_nonempty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}
