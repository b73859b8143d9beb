use thiserror::Error;

use crate::job::JobId;

/// Result type alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error types for catalog, scheduler and parser operations.
///
/// Execution failures never appear here — they are folded into the
/// `ExecutionRecord` of the run that produced them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("job {id} not found")]
    NotFound { id: JobId },

    #[error("job {id} is not scheduled")]
    NotScheduled { id: JobId },

    #[error("duplicate job: {0}")]
    Duplicate(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_cron_display() {
        let err = Error::InvalidCron {
            expr: "not-a-cron".to_string(),
            reason: "unexpected token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid cron expression 'not-a-cron': unexpected token"
        );
    }

    #[test]
    fn not_found_display() {
        let err = Error::NotFound { id: 42 };
        assert_eq!(err.to_string(), "job 42 not found");
    }

    #[test]
    fn not_scheduled_display() {
        let err = Error::NotScheduled { id: 7 };
        assert_eq!(err.to_string(), "job 7 is not scheduled");
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(err.to_string().starts_with("IO error:"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not_a_number").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.to_string().starts_with("serialization error:"));
    }
}
