//! econfetch core: data acquisition from public economic and market APIs.
//!
//! - Retrying HTTP client over a swappable transport
//! - Offset/limit pagination as an iterator of pages
//! - Depth-first category crawler with periodic checkpoints
//! - Record flattening with a stable header and derived columns
//! - CSV/JSON output with per-run manifests
//! - EIA, FRED and Yahoo Finance jobs built from the above

pub mod config;
pub mod error;
pub mod fetch;
pub mod output;
pub mod providers;
pub mod record;

pub use config::{ApiKey, DateRange, Settings};
pub use error::{ConfigError, DataError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: job inputs and outcomes can cross threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<DataError>();
        require_sync::<DataError>();
        require_send::<Settings>();
        require_sync::<Settings>();
        require_send::<fetch::Page>();
        require_sync::<fetch::Page>();
        require_send::<fetch::Query>();
        require_sync::<fetch::Query>();
        require_send::<record::RowFlattener>();
        require_sync::<record::RowFlattener>();
        require_send::<providers::EiaRequest>();
        require_sync::<providers::EiaRequest>();
        require_send::<providers::PriceSummary>();
        require_sync::<providers::PriceSummary>();
    }

    #[test]
    fn errors_render_without_credentials() {
        let err = DataError::Config(ConfigError::MissingCredential {
            var: "API_KEY_FRED".into(),
        });
        assert!(err.to_string().contains("API_KEY_FRED"));
        assert!(!err.is_transient());
    }
}
