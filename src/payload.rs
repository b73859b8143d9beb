//! Parser for the line-oriented tag grammar stored in a job's `command`
//! column.
//!
//! Recognized tags start at the beginning of a line with the full-width
//! brackets 【 and 】 around a key; the value is the rest of the line. The raw
//! text stays the storage form (operators edit it directly); this module turns
//! it into one of three typed specs right before execution.

use std::fmt::Write as _;
use std::time::Duration;

use thiserror::Error;

use crate::config::Settings;
use crate::job::ExecMode;

/// A required field was missing from the job body. The executor converts this
/// into a Failure record without attempting execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("command body is empty")]
    EmptyCommand,
    #[error("http job is missing a 【url】 tag")]
    MissingUrl,
    #[error("function job is missing a 【name】 tag")]
    MissingName,
}

/// The job body decoded by execution mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Command(CommandSpec),
    Http(HttpSpec),
    Function(FunctionSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub workdir: Option<String>,
    /// `K=V` entries appended to the inherited environment.
    pub env: Vec<String>,
    pub timeout: Duration,
    pub times: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSpec {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub data: Option<String>,
    pub cookies: Option<String>,
    pub proxy: Option<String>,
    /// Substring that forces the attempt to count as a success when found in
    /// the response body, regardless of HTTP status.
    pub result: Option<String>,
    pub timeout: Duration,
    pub times: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub args: Vec<String>,
    pub times: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl JobPayload {
    pub fn parse(mode: ExecMode, body: &str, defaults: &Settings) -> Result<Self, PayloadError> {
        match mode {
            ExecMode::Command => parse_command(body, defaults).map(Self::Command),
            ExecMode::Http => parse_http(body, defaults).map(Self::Http),
            ExecMode::Function => parse_function(body, defaults).map(Self::Function),
        }
    }

    /// Canonical tag-grammar rendering of the spec. Parsing the rendered text
    /// yields an identical spec.
    pub fn render(&self) -> String {
        match self {
            Self::Command(c) => c.render(),
            Self::Http(h) => h.render(),
            Self::Function(f) => f.render(),
        }
    }
}

/// `times <= 0` means "run once"; normalize at the use site.
fn attempts(times: u32) -> u32 {
    times.max(1)
}

impl CommandSpec {
    pub fn attempts(&self) -> u32 {
        attempts(self.times)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "【command】{}", self.command);
        if let Some(dir) = &self.workdir {
            let _ = writeln!(out, "【workdir】{dir}");
        }
        if !self.env.is_empty() {
            let _ = writeln!(out, "【env】{}", self.env.join("|||"));
        }
        let _ = writeln!(out, "【timeout】{}", self.timeout.as_secs());
        let _ = writeln!(out, "【times】{}", self.times);
        let _ = writeln!(out, "【interval】{}", self.interval.as_secs());
        out
    }
}

impl HttpSpec {
    pub fn attempts(&self) -> u32 {
        attempts(self.times)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "【url】{}", self.url);
        let _ = writeln!(out, "【mode】{}", self.method);
        if !self.headers.is_empty() {
            let pairs: Vec<String> = self
                .headers
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect();
            let _ = writeln!(out, "【headers】{}", pairs.join("|||"));
        }
        if let Some(data) = &self.data {
            let _ = writeln!(out, "【data】{data}");
        }
        if let Some(cookies) = &self.cookies {
            let _ = writeln!(out, "【cookies】{cookies}");
        }
        if let Some(proxy) = &self.proxy {
            let _ = writeln!(out, "【proxy】{proxy}");
        }
        if let Some(result) = &self.result {
            let _ = writeln!(out, "【result】{result}");
        }
        let _ = writeln!(out, "【timeout】{}", self.timeout.as_secs());
        let _ = writeln!(out, "【times】{}", self.times);
        let _ = writeln!(out, "【interval】{}", self.interval.as_secs());
        out
    }
}

impl FunctionSpec {
    pub fn attempts(&self) -> u32 {
        attempts(self.times)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "【name】{}", self.name);
        let quoted: Vec<String> = self.args.iter().map(|a| format!("\"{a}\"")).collect();
        let _ = writeln!(out, "【arg】{}", quoted.join(","));
        let _ = writeln!(out, "【timeout】{}", self.timeout.as_secs());
        let _ = writeln!(out, "【times】{}", self.times);
        let _ = writeln!(out, "【interval】{}", self.interval.as_secs());
        out
    }
}

/// Value of `【key】` when `line` carries that tag.
fn tag<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix('【')?
        .strip_prefix(key)?
        .strip_prefix('】')
        .map(str::trim)
}

fn parse_secs(value: &str) -> Option<Duration> {
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Split a `|||`-separated list, dropping empty items.
fn split_list(value: &str) -> Vec<String> {
    value
        .split("|||")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_command(body: &str, defaults: &Settings) -> Result<CommandSpec, PayloadError> {
    let mut spec = CommandSpec {
        command: String::new(),
        workdir: None,
        env: Vec::new(),
        timeout: Duration::from_secs(defaults.default_timeout_seconds),
        times: 0,
        interval: Duration::ZERO,
    };

    let mut saw_command_tag = false;
    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(v) = tag(line, "command") {
            saw_command_tag = true;
            if !v.is_empty() {
                spec.command = v.to_string();
            }
        } else if let Some(v) = tag(line, "workdir") {
            if !v.is_empty() {
                spec.workdir = Some(v.to_string());
            }
        } else if let Some(v) = tag(line, "env") {
            spec.env = split_list(v);
        } else if let Some(v) = tag(line, "timeout") {
            if let Some(d) = parse_secs(v) {
                spec.timeout = d;
            }
        } else if let Some(v) = tag(line, "times") {
            if let Ok(n) = v.parse() {
                spec.times = n;
            }
        } else if let Some(v) = tag(line, "interval") {
            if let Some(d) = parse_secs(v) {
                spec.interval = d;
            }
        }
        // Unknown tags and free text are ignored.
    }

    // Without a 【command】 tag the whole body is the command.
    if !saw_command_tag {
        spec.command = body.trim().to_string();
    }

    if spec.command.is_empty() {
        return Err(PayloadError::EmptyCommand);
    }
    Ok(spec)
}

fn parse_http(body: &str, defaults: &Settings) -> Result<HttpSpec, PayloadError> {
    let mut spec = HttpSpec {
        url: String::new(),
        method: "GET".to_string(),
        headers: Vec::new(),
        data: None,
        cookies: None,
        proxy: None,
        result: None,
        timeout: Duration::from_secs(defaults.default_timeout_seconds),
        times: 0,
        interval: Duration::ZERO,
    };

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(v) = tag(line, "url") {
            if !v.is_empty() {
                spec.url = v.to_string();
            }
        } else if let Some(v) = tag(line, "mode") {
            if !v.is_empty() {
                spec.method = v.to_uppercase();
            }
        } else if let Some(v) = tag(line, "headers") {
            for pair in split_list(v) {
                // Split once: header values may themselves contain colons.
                if let Some((key, value)) = pair.split_once(':') {
                    spec.headers
                        .push((key.trim().to_string(), value.trim().to_string()));
                }
            }
        } else if let Some(v) = tag(line, "data") {
            if !v.is_empty() {
                spec.data = Some(v.to_string());
            }
        } else if let Some(v) = tag(line, "cookies") {
            if !v.is_empty() {
                spec.cookies = Some(v.to_string());
            }
        } else if let Some(v) = tag(line, "proxy") {
            if !v.is_empty() {
                spec.proxy = Some(v.to_string());
            }
        } else if let Some(v) = tag(line, "result") {
            if !v.is_empty() {
                spec.result = Some(v.to_string());
            }
        } else if let Some(v) = tag(line, "timeout") {
            if let Some(d) = parse_secs(v) {
                spec.timeout = d;
            }
        } else if let Some(v) = tag(line, "times") {
            if let Ok(n) = v.parse() {
                spec.times = n;
            }
        } else if let Some(v) = tag(line, "interval") {
            if let Some(d) = parse_secs(v) {
                spec.interval = d;
            }
        }
    }

    if spec.url.is_empty() {
        return Err(PayloadError::MissingUrl);
    }
    Ok(spec)
}

fn parse_function(body: &str, defaults: &Settings) -> Result<FunctionSpec, PayloadError> {
    let mut spec = FunctionSpec {
        name: String::new(),
        args: Vec::new(),
        times: 0,
        interval: Duration::ZERO,
        timeout: Duration::from_secs(defaults.default_timeout_seconds),
    };

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(v) = tag(line, "name") {
            if !v.is_empty() {
                spec.name = v.to_string();
            }
        } else if let Some(v) = tag(line, "arg") {
            spec.args = parse_function_args(v);
        } else if let Some(v) = tag(line, "times") {
            if let Ok(n) = v.parse() {
                spec.times = n;
            }
        } else if let Some(v) = tag(line, "interval") {
            if let Some(d) = parse_secs(v) {
                spec.interval = d;
            }
        } else if let Some(v) = tag(line, "timeout") {
            if let Some(d) = parse_secs(v) {
                spec.timeout = d;
            }
        }
    }

    if spec.name.is_empty() {
        return Err(PayloadError::MissingName);
    }
    Ok(spec)
}

/// Comma-separated argument list with `"quoted"` strings and `\` escapes.
/// Empty positions are preserved; an empty input yields an empty list.
fn parse_function_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    if input.trim().is_empty() {
        return args;
    }

    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape_next = false;
    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    args.push(current.trim().to_string());
    args
}
