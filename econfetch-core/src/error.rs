//! Structured error types for fetch jobs.
//!
//! `DataError` covers everything that can go wrong once a job is talking to an
//! upstream; `ConfigError` covers what is caught before the first request.
//! Both are displayable in CLI output as-is.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while fetching, parsing or persisting upstream data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("rate limited by provider{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<DataError>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl DataError {
    /// Whether another attempt at the same request could succeed.
    ///
    /// Timeouts, connection failures, 429 and 5xx are transient. Everything
    /// else (bad request, auth, malformed body, local I/O) fails immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::NetworkUnreachable(_)
            | DataError::Timeout(_)
            | DataError::RateLimited { .. } => true,
            DataError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Wait duration supplied by the upstream, if any (HTTP 429 `Retry-After`).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DataError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors detected before any network call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("credential {var} not found (set it in the environment or a .env file)")]
    MissingCredential { var: String },

    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("end date {end} cannot be before start date {start}")]
    InvalidDateRange { start: String, end: String },

    #[error("invalid URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("unsupported interval '{0}'")]
    InvalidInterval(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("read settings file {}: {source}", .path.display())]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse settings TOML: {0}")]
    ParseSettings(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(DataError::Timeout("t".into()).is_transient());
        assert!(DataError::NetworkUnreachable("n".into()).is_transient());
        assert!(DataError::RateLimited { retry_after: None }.is_transient());
        assert!(DataError::HttpStatus {
            status: 503,
            body: String::new()
        }
        .is_transient());

        assert!(!DataError::HttpStatus {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!DataError::ResponseFormatChanged("x".into()).is_transient());
        assert!(!DataError::AuthenticationRequired("x".into()).is_transient());
    }

    #[test]
    fn retry_after_only_from_rate_limit() {
        let rl = DataError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(rl.retry_after(), Some(Duration::from_secs(7)));
        assert!(rl.to_string().contains("retry after 7s"));
        assert_eq!(DataError::Timeout("t".into()).retry_after(), None);
    }

    #[test]
    fn config_error_wraps_into_data_error() {
        let err: DataError = ConfigError::MissingCredential {
            var: "API_KEY_FRED".into(),
        }
        .into();
        assert!(err.to_string().contains("API_KEY_FRED"));
        assert!(!err.is_transient());
    }
}
