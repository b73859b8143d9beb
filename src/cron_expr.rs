use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;

use crate::error::{Error, Result};

/// A parsed schedule: either a cron expression or a fixed `@every` interval.
///
/// Accepted dialects:
/// - 6-field cron with seconds: `sec min hour dom month dow`
/// - 7-field cron with a trailing year field
/// - 5-field Unix cron (normalized to fire at second 0)
/// - the `@hourly` / `@daily` / `@weekly` / `@monthly` / `@yearly` shorthands
/// - `@every <duration>` with a human-readable duration (`30s`, `1h30m`, …)
#[derive(Debug, Clone)]
pub enum CronSchedule {
    Expr(Schedule),
    Every(Duration),
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid(expr, "expression is empty"));
        }

        if let Some(rest) = trimmed.strip_prefix("@every") {
            let period = humantime::parse_duration(rest.trim())
                .map_err(|e| invalid(expr, &e.to_string()))?;
            if period.is_zero() {
                return Err(invalid(expr, "@every period must be non-zero"));
            }
            return Ok(Self::Every(period));
        }

        let normalized = normalize_field_count(trimmed);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| invalid(expr, &e.to_string()))?;
        Ok(Self::Expr(schedule))
    }

    /// First fire time strictly after `from`, in local time.
    ///
    /// Returns `None` for cron expressions with no future occurrence (e.g. a
    /// year field entirely in the past).
    pub fn next_after(&self, from: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Self::Expr(schedule) => schedule.after(&from).next(),
            Self::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                Some(from + period)
            }
        }
    }
}

/// Validate an expression without keeping the parsed schedule.
pub fn validate(expr: &str) -> Result<()> {
    CronSchedule::parse(expr).map(|_| ())
}

/// The `cron` crate wants at least six fields; a classic 5-field Unix
/// expression gets a leading "0" so it fires at second 0 of each matching
/// minute. Shorthands and already-extended expressions pass through.
fn normalize_field_count(expr: &str) -> String {
    if expr.starts_with('@') {
        return expr.to_string();
    }
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn invalid(expr: &str, reason: &str) -> Error {
    Error::InvalidCron {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn six_field_expression_parses() {
        assert!(validate("*/5 * * * * *").is_ok());
        assert!(validate("0 0 8 * * *").is_ok());
    }

    #[test]
    fn five_field_expression_is_normalized() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        let next = schedule.next_after(local(2026, 1, 19, 10, 32, 0)).unwrap();
        assert_eq!(next.minute(), 45);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn shorthands_parse() {
        for expr in ["@hourly", "@daily", "@weekly", "@monthly", "@yearly"] {
            assert!(validate(expr).is_ok(), "{expr} should be accepted");
        }
    }

    #[test]
    fn every_with_duration_parses() {
        assert!(validate("@every 30s").is_ok());
        assert!(validate("@every 1h30m").is_ok());
        assert!(validate("@every 500ms").is_ok());
    }

    #[test]
    fn every_zero_is_rejected() {
        let err = validate("@every 0s").unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn every_without_duration_is_rejected() {
        assert!(validate("@every").is_err());
        assert!(validate("@every soon").is_err());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(validate("not-a-cron").is_err());
        assert!(validate("* * * *").is_err());
        assert!(validate("61 * * * * *").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn next_after_is_strictly_after() {
        let schedule = CronSchedule::parse("0 0 * * * *").unwrap();
        // Exactly on an hour boundary: the next fire is the following hour.
        let from = local(2026, 3, 10, 9, 0, 0);
        let next = schedule.next_after(from).unwrap();
        assert_eq!(next, local(2026, 3, 10, 10, 0, 0));
    }

    #[test]
    fn every_adds_period_to_from() {
        let schedule = CronSchedule::parse("@every 90s").unwrap();
        let from = local(2026, 3, 10, 9, 0, 0);
        assert_eq!(schedule.next_after(from).unwrap(), local(2026, 3, 10, 9, 1, 30));
    }

    #[test]
    fn parse_then_reparse_yields_same_fire_sequence() {
        let a = CronSchedule::parse("*/10 30 * * * *").unwrap();
        let b = CronSchedule::parse("*/10 30 * * * *").unwrap();
        let mut from = local(2026, 6, 1, 0, 0, 0);
        for _ in 0..5 {
            let na = a.next_after(from).unwrap();
            let nb = b.next_after(from).unwrap();
            assert_eq!(na, nb);
            from = na;
        }
    }

    #[test]
    fn year_in_the_past_has_no_next_fire() {
        let schedule = CronSchedule::parse("0 0 0 1 1 * 2000").unwrap();
        assert!(schedule.next_after(Local::now()).is_none());
    }
}
