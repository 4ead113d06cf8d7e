//! Job settings and credentials.
//!
//! Every tunable that used to be a module-level constant lives here. Defaults
//! match the upstreams' documented limits; a TOML file can override any
//! subset:
//!
//! ```toml
//! [http]
//! timeout_secs = 60
//!
//! [eia]
//! page_size = 2500
//! total_policy = "verify"
//!
//! [fred.retry]
//! max_attempts = 8
//! ```

use crate::error::ConfigError;
use crate::fetch::{RetryPolicy, TotalPolicy};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// All job settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub http: HttpSettings,
    pub eia: EiaSettings,
    pub fred: FredSettings,
    pub yahoo: YahooSettings,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadSettings {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string. Missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidSetting(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("eia.page_size", self.eia.page_size),
            ("fred.observation_page_size", self.fred.observation_page_size),
            ("fred.series_page_size", self.fred.series_page_size),
            ("http.timeout_secs", self.http.timeout_secs as usize),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidSetting(format!("{name} must be positive")));
            }
        }
        for (name, retry) in [
            ("eia.retry", self.eia.retry),
            ("fred.retry", self.fred.retry),
            ("yahoo.retry", self.yahoo.retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(ConfigError::InvalidSetting(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    /// Override the default browser-like user agent.
    pub user_agent: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Longest `Retry-After` wait honoured; longer requests are clamped.
    pub max_retry_after_secs: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
            .with_max_retry_after(Duration::from_secs(self.max_retry_after_secs))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 1000,
            max_retry_after_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EiaSettings {
    /// Rows per request; 5000 is the EIA v2 maximum.
    pub page_size: usize,
    pub request_delay_ms: u64,
    pub total_policy: TotalPolicy,
    pub api_key_var: String,
    pub retry: RetrySettings,
}

impl Default for EiaSettings {
    fn default() -> Self {
        Self {
            page_size: 5000,
            request_delay_ms: 1000,
            total_policy: TotalPolicy::Trust,
            api_key_var: "API_KEY_EIA".into(),
            retry: RetrySettings::default(),
        }
    }
}

impl EiaSettings {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FredSettings {
    pub base_url: String,
    /// `series/observations` accepts up to 100000 rows per request.
    pub observation_page_size: usize,
    /// `category/series` accepts up to 1000 rows per request.
    pub series_page_size: usize,
    pub request_delay_ms: u64,
    pub crawl_delay_ms: u64,
    pub save_every: usize,
    pub api_key_var: String,
    pub retry: RetrySettings,
}

impl Default for FredSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.stlouisfed.org/fred".into(),
            observation_page_size: 100_000,
            series_page_size: 1000,
            request_delay_ms: 1000,
            crawl_delay_ms: 500,
            save_every: 10_000,
            api_key_var: "API_KEY_FRED".into(),
            retry: RetrySettings::default(),
        }
    }
}

impl FredSettings {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct YahooSettings {
    pub chart_url: String,
    pub fundamentals_url: String,
    /// Longest lookback Yahoo serves for intraday intervals.
    pub intraday_max_days: i64,
    pub retry: RetrySettings,
}

impl Default for YahooSettings {
    fn default() -> Self {
        Self {
            chart_url: "https://query2.finance.yahoo.com/v8/finance/chart".into(),
            fundamentals_url:
                "https://query2.finance.yahoo.com/ws/fundamentals-timeseries/v1/finance/timeseries"
                    .into(),
            intraday_max_days: 730,
            retry: RetrySettings {
                max_attempts: 3,
                ..RetrySettings::default()
            },
        }
    }
}

/// An API key read from the environment. Debug output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read `var` from the process environment. Empty counts as missing.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(Self(v.trim().to_string())),
            _ => Err(ConfigError::MissingCredential {
                var: var.to_string(),
            }),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Parse an optional `YYYY-MM-DD` date.
pub fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ConfigError> {
    raw.map(|s| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| ConfigError::InvalidDate {
            value: s.to_string(),
        })
    })
    .transpose()
}

/// Optional inclusive date bounds, validated so that `start <= end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, ConfigError> {
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(ConfigError::InvalidDateRange {
                    start: s.to_string(),
                    end: e.to_string(),
                });
            }
        }
        Ok(Self { start, end })
    }

    /// Parse and validate `YYYY-MM-DD` bounds.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, ConfigError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}
