//! Yahoo Finance price bars from the v8 chart API.
//!
//! Yahoo has no official API and changes its response format without notice;
//! anything that does not deserialize into [`ChartResponse`] is reported as
//! [`DataError::ResponseFormatChanged`] and not retried.

use crate::config::{DateRange, YahooSettings};
use crate::error::{ConfigError, DataError};
use crate::fetch::{ApiClient, Query};
use crate::output::{write_table, RunManifest};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};
use url::Url;

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds.
    gmtoffset: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Bar interval accepted by the chart API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    OneMinute,
    TwoMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    SixtyMinutes,
    NinetyMinutes,
    OneHour,
    OneDay,
    FiveDays,
    OneWeek,
    OneMonth,
    ThreeMonths,
}

impl Interval {
    pub const ALL: [Interval; 13] = [
        Interval::OneMinute,
        Interval::TwoMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::SixtyMinutes,
        Interval::NinetyMinutes,
        Interval::OneHour,
        Interval::OneDay,
        Interval::FiveDays,
        Interval::OneWeek,
        Interval::OneMonth,
        Interval::ThreeMonths,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::TwoMinutes => "2m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::SixtyMinutes => "60m",
            Interval::NinetyMinutes => "90m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
            Interval::FiveDays => "5d",
            Interval::OneWeek => "1wk",
            Interval::OneMonth => "1mo",
            Interval::ThreeMonths => "3mo",
        }
    }

    /// Minute and hour bars. Yahoo only serves a limited lookback for these.
    pub fn is_intraday(self) -> bool {
        matches!(
            self,
            Interval::OneMinute
                | Interval::TwoMinutes
                | Interval::FiveMinutes
                | Interval::FifteenMinutes
                | Interval::ThirtyMinutes
                | Interval::SixtyMinutes
                | Interval::NinetyMinutes
                | Interval::OneHour
        )
    }

    /// Name of the time column in the output table.
    pub fn time_column(self) -> &'static str {
        if self.is_intraday() {
            "Datetime"
        } else {
            "Date"
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidInterval(s.to_string()))
    }
}

/// Check a ticker symbol (`AAPL`, `^GSPC`, `BRK-B`, `EURUSD=X`).
pub fn validate_ticker(ticker: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidIdentifier {
        value: ticker.to_string(),
        reason: reason.to_string(),
    };
    if ticker.trim().is_empty() {
        return Err(invalid("ticker is empty"));
    }
    if !ticker
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '^' | '.' | '-' | '=' | '_'))
    {
        return Err(invalid("unexpected character in ticker"));
    }
    Ok(())
}

/// Time window sent to the chart API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartWindow {
    /// Everything Yahoo has (`range=max`).
    Max,
    Period {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl ChartWindow {
    /// Resolve optional dates against `now`.
    ///
    /// No dates means the full history. A missing start means the earliest
    /// data (1900-01-01), a missing end means `now`. Intraday intervals are
    /// trimmed to the last `max_intraday_days` days and never end in the
    /// future.
    pub fn resolve(
        range: DateRange,
        interval: Interval,
        now: DateTime<Utc>,
        max_intraday_days: i64,
    ) -> Result<Self, ConfigError> {
        if range.is_unbounded() {
            return Ok(ChartWindow::Max);
        }
        let mut start = range.start.map(start_of_day).unwrap_or_else(earliest);
        let mut end = range.end.map(end_of_day).unwrap_or(now);
        if end < start {
            return Err(ConfigError::InvalidDateRange {
                start: start.date_naive().to_string(),
                end: end.date_naive().to_string(),
            });
        }

        if interval.is_intraday() {
            let floor = now - Duration::days(max_intraday_days);
            if start < floor {
                warn!(days = max_intraday_days, "range too long for intraday data; trimming start");
                start = floor;
            }
            if end > now {
                end = now;
            }
            if end < start {
                return Err(ConfigError::InvalidDateRange {
                    start: start.date_naive().to_string(),
                    end: end.date_naive().to_string(),
                });
            }
        }
        Ok(ChartWindow::Period { start, end })
    }

    fn apply(&self, query: &mut Query) {
        match self {
            ChartWindow::Max => {
                query.set("range", "max");
            }
            ChartWindow::Period { start, end } => {
                query.set("period1", start.timestamp().to_string());
                query.set("period2", end.timestamp().to_string());
            }
        }
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::seconds(86_399)
}

fn earliest() -> DateTime<Utc> {
    start_of_day(NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default())
}

/// One parsed bar. Missing fields stay `None` and are written as empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub time: DateTime<FixedOffset>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

impl PriceBar {
    fn to_row(&self, interval: Interval) -> Vec<String> {
        let time = if interval.is_intraday() {
            self.time.format("%Y-%m-%d %H:%M:%S%:z").to_string()
        } else {
            self.time.format("%Y-%m-%d").to_string()
        };
        let num = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        vec![
            time,
            num(self.open),
            num(self.high),
            num(self.low),
            num(self.close),
            num(self.adj_close),
            self.volume.map(|v| v.to_string()).unwrap_or_default(),
        ]
    }
}

pub fn price_header(interval: Interval) -> [&'static str; 7] {
    [
        interval.time_column(),
        "Open",
        "High",
        "Low",
        "Close",
        "Adj Close",
        "Volume",
    ]
}

/// Parse a chart API body into bars in the exchange's local offset.
///
/// Bars whose OHLCV are all missing (holidays, halted sessions) are skipped.
/// A result with no timestamps yields no bars.
pub fn parse_chart(ticker: &str, body: serde_json::Value) -> Result<Vec<PriceBar>, DataError> {
    let resp: ChartResponse = serde_json::from_value(body).map_err(|e| {
        DataError::ResponseFormatChanged(format!("failed to parse chart for {ticker}: {e}"))
    })?;

    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => DataError::NotFound(format!("ticker '{ticker}'")),
        Some(err) => DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => DataError::ResponseFormatChanged("empty result with no error".into()),
    })?;

    let Some(data) = result.into_iter().next() else {
        return Ok(Vec::new());
    };
    let offset = data
        .meta
        .gmtoffset
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let time = DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?
            .with_timezone(&offset);

        let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let bar = PriceBar {
            time,
            open: at(&quote.open),
            high: at(&quote.high),
            low: at(&quote.low),
            close: at(&quote.close),
            adj_close: adj_closes.as_ref().and_then(at),
            volume: quote.volume.get(i).copied().flatten(),
        };

        if bar.open.is_none()
            && bar.high.is_none()
            && bar.low.is_none()
            && bar.close.is_none()
            && bar.volume.is_none()
        {
            continue;
        }
        bars.push(bar);
    }
    Ok(bars)
}

/// A validated price download.
#[derive(Debug, Clone)]
pub struct PriceRequest {
    pub ticker: String,
    pub interval: Interval,
    pub range: DateRange,
    pub output_dir: PathBuf,
}

impl PriceRequest {
    pub fn new(
        ticker: &str,
        interval: Interval,
        range: DateRange,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let ticker = ticker.trim();
        validate_ticker(ticker)?;
        Ok(Self {
            ticker: ticker.to_uppercase(),
            interval,
            range,
            output_dir: output_dir.into(),
        })
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_data.csv", self.ticker, self.interval))
    }
}

#[derive(Debug, Clone)]
pub struct PriceSummary {
    pub ticker: String,
    pub interval: Interval,
    pub rows: usize,
    pub first: Option<String>,
    pub last: Option<String>,
    /// `None` when Yahoo returned no bars (nothing is written).
    pub output: Option<PathBuf>,
}

/// Build the chart URL for a ticker.
pub fn chart_endpoint(settings: &YahooSettings, ticker: &str) -> Result<Url, ConfigError> {
    let raw = format!("{}/{}", settings.chart_url.trim_end_matches('/'), ticker);
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
        value: raw,
        reason: e.to_string(),
    })
}

/// Download bars for one ticker into `{ticker}_{interval}_data.csv`.
pub fn run_prices(
    client: &ApiClient<'_>,
    request: &PriceRequest,
    settings: &YahooSettings,
    now: DateTime<Utc>,
) -> Result<PriceSummary, DataError> {
    let window = ChartWindow::resolve(request.range, request.interval, now, settings.intraday_max_days)?;
    if window == ChartWindow::Max {
        info!("fetching full available history");
    }

    let endpoint = chart_endpoint(settings, &request.ticker)?;
    let mut query = Query::new();
    query.set("interval", request.interval.as_str());
    query.set("includeAdjustedClose", "true");
    window.apply(&mut query);

    info!(ticker = %request.ticker, interval = %request.interval, "fetching price data");
    let body = client.get_json(&endpoint, &query).map_err(|e| match e {
        DataError::HttpStatus { status: 404, .. } => {
            DataError::NotFound(format!("ticker '{}'", request.ticker))
        }
        other => other,
    })?;
    let bars = parse_chart(&request.ticker, body)?;

    let empty = PriceSummary {
        ticker: request.ticker.clone(),
        interval: request.interval,
        rows: 0,
        first: None,
        last: None,
        output: None,
    };
    if bars.is_empty() {
        warn!(ticker = %request.ticker, "no data returned; ticker may be invalid or the range empty");
        return Ok(empty);
    }

    let rows: Vec<Vec<String>> = bars.iter().map(|b| b.to_row(request.interval)).collect();
    let header = price_header(request.interval);
    let output = request.output_path();
    let written = write_table(&output, &header, &rows)?;
    let columns: Vec<String> = header.iter().map(|c| c.to_string()).collect();
    RunManifest::for_csv(
        "yahoo",
        query.to_url(&endpoint).as_str(),
        &output,
        &columns,
        written,
        1,
    )?
    .write()?;
    info!(rows = written, path = %output.display(), "saved price data");

    Ok(PriceSummary {
        rows: written,
        first: rows.first().map(|r| r[0].clone()),
        last: rows.last().map(|r| r[0].clone()),
        output: Some(output),
        ..empty
    })
}
