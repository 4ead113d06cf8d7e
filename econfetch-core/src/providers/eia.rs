//! EIA v2 API: paginated data pulls from a user-supplied query URL.
//!
//! The user pastes a full URL from the EIA API browser (frequency, data
//! columns, facets, sort). Pagination, the API key and optional date bounds
//! are layered on top, and every page is streamed straight into one CSV with
//! a derived `timestamp` column next to `period`.

use crate::config::{ApiKey, DateRange, EiaSettings};
use crate::error::{ConfigError, DataError};
use crate::fetch::{ApiClient, Cursor, Page, PageSource, PageStats, Paginator, Query, Record};
use crate::output::{CsvSink, RunManifest};
use crate::record::{DerivedColumn, RowFlattener};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

/// A fully specified EIA pull.
#[derive(Debug, Clone)]
pub struct EiaRequest {
    pub endpoint: Url,
    pub query: Query,
    pub range: DateRange,
    pub output: PathBuf,
}

impl EiaRequest {
    /// Split the pasted URL into endpoint and user query. Pagination keys the
    /// user may have copied along (`offset`, `length`, `api_key`) are dropped;
    /// they are always set per page.
    pub fn from_url(raw: &str, range: DateRange, output: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let (endpoint, mut query) = Query::from_url(raw)?;
        if !endpoint.path().starts_with("/v2/") {
            return Err(ConfigError::InvalidUrl {
                value: raw.to_string(),
                reason: "expected an EIA v2 data URL (https://api.eia.gov/v2/...)".into(),
            });
        }
        for key in ["offset", "length", "api_key"] {
            query.remove(key);
        }
        Ok(Self {
            endpoint,
            query,
            range,
            output: output.into(),
        })
    }
}

/// Page source over one EIA v2 data route.
pub struct EiaSource<'a> {
    client: &'a ApiClient<'a>,
    endpoint: &'a Url,
    query: Query,
}

impl<'a> EiaSource<'a> {
    /// Merge the user query with credentials and date bounds. Cursor
    /// parameters are set per page.
    pub fn new(client: &'a ApiClient<'a>, request: &'a EiaRequest, api_key: &ApiKey) -> Self {
        let mut query = request.query.clone();
        query.set_secret("api_key", api_key.expose());
        if let Some(start) = request.range.start {
            query.set("start", start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = request.range.end {
            query.set("end", end.format("%Y-%m-%d").to_string());
        }
        Self {
            client,
            endpoint: &request.endpoint,
            query,
        }
    }

    /// The query for one page.
    pub fn page_query(&self, cursor: Cursor) -> Query {
        let mut q = self.query.clone();
        q.set("offset", cursor.offset.to_string());
        q.set("length", cursor.limit.to_string());
        q
    }

    pub fn redacted_endpoint(&self) -> String {
        self.query.redacted_url(self.endpoint).to_string()
    }
}

impl PageSource for EiaSource<'_> {
    fn fetch_page(&self, cursor: Cursor) -> Result<Option<Page>, DataError> {
        let body = self.client.get_json(self.endpoint, &self.page_query(cursor))?;
        Ok(parse_page(&body))
    }
}

/// Extract records and total from an EIA v2 envelope.
///
/// Returns `None` when `response.data` is missing or not an array. `total`
/// arrives as a number or a numeric string depending on the route.
pub fn parse_page(body: &Value) -> Option<Page> {
    let response = body.get("response")?;
    let data = response.get("data")?.as_array()?;
    let records: Vec<Record> = data
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
    let total = response.get("total").and_then(parse_total);
    Some(Page::new(records, total))
}

fn parse_total(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Outcome of an EIA pull.
#[derive(Debug, Clone)]
pub struct EiaSummary {
    pub output: PathBuf,
    pub manifest: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub stats: PageStats,
}

/// Run a full EIA pull into `request.output`.
///
/// The CSV is created before the first request and the header written once,
/// from the first page. If no page carries data the file holds no header.
pub fn run_eia(
    client: &ApiClient<'_>,
    request: &EiaRequest,
    api_key: &ApiKey,
    settings: &EiaSettings,
) -> Result<EiaSummary, DataError> {
    let source = EiaSource::new(client, request, api_key);
    let endpoint = source.redacted_endpoint();
    info!(endpoint = %request.endpoint, "fetching from EIA");
    if !request.range.is_unbounded() {
        info!(
            start = %request.range.start.map(|d| d.to_string()).unwrap_or_else(|| "beginning".into()),
            end = %request.range.end.map(|d| d.to_string()).unwrap_or_else(|| "latest".into()),
            "date range"
        );
    }

    let mut sink = CsvSink::create(&request.output)?;
    let mut flattener = RowFlattener::new().with_derived(DerivedColumn::period_timestamp());
    let mut pages = Paginator::new(&source, settings.page_size, client.sleeper())
        .with_delay(settings.request_delay())
        .with_total_policy(settings.total_policy);

    for page in pages.by_ref() {
        let page = page?;
        write_page(&mut sink, &mut flattener, &page)?;
    }
    let stats = pages.stats();

    let columns = sink.columns().map(<[String]>::to_vec).unwrap_or_default();
    let output = sink.path().to_path_buf();
    let rows = sink.finish()?;
    let manifest = RunManifest::for_csv("eia", &endpoint, &output, &columns, rows, stats.requests)?.write()?;

    info!(rows, path = %output.display(), "EIA data saved");
    Ok(EiaSummary {
        output,
        manifest,
        rows,
        columns,
        stats,
    })
}

fn write_page(sink: &mut CsvSink, flattener: &mut RowFlattener, page: &Page) -> Result<(), DataError> {
    for record in &page.records {
        if !sink.has_header() {
            let header = flattener.establish(record).to_vec();
            sink.write_header(&header)?;
        }
        sink.write_row(&flattener.flatten(record))?;
    }
    Ok(())
}

/// Default output location for EIA pulls.
pub fn default_output() -> &'static Path {
    Path::new("data/EIA/eia_data.csv")
}
