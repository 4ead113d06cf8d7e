//! FRED (St. Louis Fed) API: single-series downloads and a full category crawl.
//!
//! Every request carries `api_key` and `file_type=json`. Observations and
//! category series listings are offset/limit paginated with the total in
//! `count`; category children come back in one response.

use crate::config::{ApiKey, DateRange, FredSettings};
use crate::error::{ConfigError, DataError};
use crate::fetch::{
    crawl_categories, ApiClient, Category, CategorySource, Checkpoint, CrawlOptions, Cursor, Page,
    PageSource, PageStats, Paginator, Query, Record, SeriesListing,
};
use crate::output::{file_component, write_json, write_table, RunManifest};
use crate::record::RowFlattener;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// FRED marks missing observations with a lone dot.
const MISSING_VALUE: &str = ".";

/// Authenticated FRED endpoint access.
pub struct FredClient<'a> {
    api: &'a ApiClient<'a>,
    base: String,
    api_key: ApiKey,
}

impl<'a> FredClient<'a> {
    pub fn new(api: &'a ApiClient<'a>, settings: &FredSettings, api_key: ApiKey) -> Result<Self, ConfigError> {
        let base = settings.base_url.trim_end_matches('/').to_string();
        Url::parse(&base).map_err(|e| ConfigError::InvalidUrl {
            value: settings.base_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { api, base, api_key })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DataError> {
        Url::parse(&format!("{}/{}", self.base, path)).map_err(|e| {
            DataError::Config(ConfigError::InvalidUrl {
                value: format!("{}/{}", self.base, path),
                reason: e.to_string(),
            })
        })
    }

    fn base_query(&self) -> Query {
        let mut q = Query::new();
        q.set_secret("api_key", self.api_key.expose());
        q.set("file_type", "json");
        q
    }

    /// GET `path` with credentials plus `params`.
    pub fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, DataError> {
        let endpoint = self.endpoint(path)?;
        let mut query = self.base_query();
        for (name, value) in params {
            query.set(*name, value.clone());
        }
        self.api.get_json(&endpoint, &query)
    }

    pub fn redacted(&self, path: &str) -> String {
        match self.endpoint(path) {
            Ok(url) => self.base_query().redacted_url(&url).to_string(),
            Err(_) => format!("{}/{}", self.base, path),
        }
    }

    /// Metadata object for one series (title, frequency, units, ...).
    pub fn series_metadata(&self, series_id: &str) -> Result<Record, DataError> {
        let body = self
            .get("series", &[("series_id", series_id.to_string())])
            .map_err(|e| match e {
                DataError::HttpStatus { status: 400 | 404, body } => {
                    DataError::NotFound(format!("FRED series '{series_id}': {body}"))
                }
                other => other,
            })?;
        body.get("seriess")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| DataError::NotFound(format!("FRED series '{series_id}'")))
    }

    pub fn api(&self) -> &'a ApiClient<'a> {
        self.api
    }
}

/// Check a series identifier before touching the network.
pub fn validate_series_id(id: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidIdentifier {
        value: id.to_string(),
        reason: reason.to_string(),
    };
    if id.trim().is_empty() {
        return Err(invalid("series id is empty"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(invalid("series ids contain only letters, digits, '_' and '.'"));
    }
    Ok(())
}

/// Paginated list endpoint: `path` with a fixed parameter, records under
/// `list_key`, total under `count`.
pub struct FredListSource<'a> {
    client: &'a FredClient<'a>,
    path: &'static str,
    list_key: &'static str,
    params: Vec<(&'static str, String)>,
}

impl<'a> FredListSource<'a> {
    pub fn observations(client: &'a FredClient<'a>, series_id: &str, range: DateRange) -> Self {
        let mut params = vec![("series_id", series_id.to_string())];
        if let Some(start) = range.start {
            params.push(("observation_start", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = range.end {
            params.push(("observation_end", end.format("%Y-%m-%d").to_string()));
        }
        Self {
            client,
            path: "series/observations",
            list_key: "observations",
            params,
        }
    }

    pub fn category_series(client: &'a FredClient<'a>, category_id: u64) -> Self {
        Self {
            client,
            path: "category/series",
            list_key: "seriess",
            params: vec![("category_id", category_id.to_string())],
        }
    }
}

impl PageSource for FredListSource<'_> {
    fn fetch_page(&self, cursor: Cursor) -> Result<Option<Page>, DataError> {
        let mut params = self.params.clone();
        params.push(("offset", cursor.offset.to_string()));
        params.push(("limit", cursor.limit.to_string()));
        let body = self.client.get(self.path, &params)?;
        Ok(parse_list_page(&body, self.list_key))
    }
}

/// Records under `list_key`, total under `count`. `None` if the list is absent.
pub fn parse_list_page(body: &Value, list_key: &str) -> Option<Page> {
    let list = body.get(list_key)?.as_array()?;
    let records = list.iter().filter_map(|v| v.as_object().cloned()).collect();
    let total = body.get("count").and_then(Value::as_u64).map(|n| n as usize);
    Some(Page::new(records, total))
}

/// Child categories from a `category/children` body.
pub fn parse_children(body: &Value) -> Option<Vec<Category>> {
    let list = body.get("categories")?.as_array()?;
    Some(
        list.iter()
            .filter_map(|c| {
                Some(Category {
                    id: c.get("id")?.as_u64()?,
                    name: c.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
            })
            .collect(),
    )
}

/// Crawl adapter: category series are paginated, children come in one call.
pub struct FredCategories<'a> {
    client: &'a FredClient<'a>,
    page_size: usize,
    delay: Duration,
}

impl<'a> FredCategories<'a> {
    pub fn new(client: &'a FredClient<'a>, page_size: usize, delay: Duration) -> Self {
        Self {
            client,
            page_size,
            delay,
        }
    }
}

impl CategorySource for FredCategories<'_> {
    fn series(&self, category_id: u64) -> Result<SeriesListing, DataError> {
        let source = FredListSource::category_series(self.client, category_id);
        let mut pages = Paginator::new(source, self.page_size, self.client.api().sleeper()).with_delay(self.delay);
        let mut records = Vec::new();
        for page in pages.by_ref() {
            records.extend(page?.records);
        }
        Ok(SeriesListing {
            records,
            requests: pages.stats().requests,
        })
    }

    fn children(&self, category_id: u64) -> Result<Vec<Category>, DataError> {
        let body = self
            .client
            .get("category/children", &[("category_id", category_id.to_string())])?;
        Ok(parse_children(&body).unwrap_or_else(|| {
            warn!(category_id, "no category list in response; treating as leaf");
            Vec::new()
        }))
    }
}

// ─── Single series ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FredSeriesRequest {
    pub series_id: String,
    pub range: DateRange,
    pub output_dir: PathBuf,
}

impl FredSeriesRequest {
    pub fn new(series_id: &str, range: DateRange, output_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let series_id = series_id.trim();
        validate_series_id(series_id)?;
        Ok(Self {
            series_id: series_id.to_string(),
            range,
            output_dir: output_dir.into(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FredSeriesSummary {
    pub series_id: String,
    pub title: String,
    pub rows: usize,
    /// `None` when the series returned no observations (nothing is written).
    pub data_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub stats: PageStats,
}

/// Download one series: metadata, then observations, then both files.
pub fn run_series(
    client: &FredClient<'_>,
    request: &FredSeriesRequest,
    settings: &FredSettings,
) -> Result<FredSeriesSummary, DataError> {
    let meta = client.series_metadata(&request.series_id)?;
    let title = meta_str(&meta, "title").unwrap_or("series").to_string();
    info!(
        series = %request.series_id,
        title = %title,
        frequency = meta_str(&meta, "frequency").unwrap_or("?"),
        units = meta_str(&meta, "units").unwrap_or("?"),
        "found series"
    );
    if request.range.is_unbounded() {
        info!("no date range provided; fetching full available dataset");
    }

    let api = client.api();
    api.sleeper().sleep(settings.request_delay());

    let source = FredListSource::observations(client, &request.series_id, request.range);
    let mut pages = Paginator::new(source, settings.observation_page_size, api.sleeper())
        .with_delay(settings.request_delay());
    let mut flattener = RowFlattener::new().with_header(["date", "value"]);
    let mut rows = Vec::new();
    for page in pages.by_ref() {
        for record in page?.records {
            rows.push(flattener.flatten(&clean_observation(record)));
        }
    }
    let stats = pages.stats();

    if rows.is_empty() {
        warn!(series = %request.series_id, "no data points returned");
        return Ok(FredSeriesSummary {
            series_id: request.series_id.clone(),
            title,
            rows: 0,
            data_path: None,
            metadata_path: None,
            stats,
        });
    }
    info!(rows = rows.len(), "retrieved data points");

    let stem = series_file_stem(&request.series_id, &meta, request.range);
    let data_path = request.output_dir.join(format!("{stem}.csv"));
    let metadata_path = request.output_dir.join(format!("{stem}_metadata.json"));

    let written = write_table(&data_path, &["date", "value"], &rows)?;
    info!(rows = written, path = %data_path.display(), "saved observations");
    write_json(&metadata_path, &meta)?;
    info!(path = %metadata_path.display(), "saved metadata");
    RunManifest::for_csv(
        "fred",
        &client.redacted("series/observations"),
        &data_path,
        &["date".to_string(), "value".to_string()],
        written,
        stats.requests + 1,
    )?
    .write()?;

    Ok(FredSeriesSummary {
        series_id: request.series_id.clone(),
        title,
        rows: written,
        data_path: Some(data_path),
        metadata_path: Some(metadata_path),
        stats,
    })
}

fn meta_str<'m>(meta: &'m Record, key: &str) -> Option<&'m str> {
    meta.get(key).and_then(Value::as_str)
}

/// Keep the observation's `value` only if it is numeric.
fn clean_observation(mut record: Record) -> Record {
    let numeric = match record.get("value") {
        Some(Value::String(s)) => s != MISSING_VALUE && s.trim().parse::<f64>().is_ok(),
        Some(Value::Number(_)) => true,
        _ => false,
    };
    if !numeric {
        record.insert("value".into(), Value::Null);
    }
    record
}

/// `{id}_{freq}_{start|FULL}_{end|LATEST}_{title}` for a series download.
pub fn series_file_stem(series_id: &str, meta: &Record, range: DateRange) -> String {
    let freq: String = meta_str(meta, "frequency_short")
        .or_else(|| meta_str(meta, "frequency"))
        .unwrap_or("unknown")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let title = file_component(meta_str(meta, "title").unwrap_or("series"), 60);
    let start = range
        .start
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "FULL".into());
    let end = range
        .end
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "LATEST".into());
    format!("{series_id}_{freq}_{start}_{end}_{title}")
}

// ─── Category crawl ─────────────────────────────────────────────────

/// Writes the accumulated series to one CSV, swapping in each new snapshot
/// only once it is complete.
pub struct CsvCheckpoint {
    path: PathBuf,
}

impl CsvCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Checkpoint for CsvCheckpoint {
    fn save(&mut self, series: &[Record]) -> Result<(), DataError> {
        write_records(&self.path, series).map(|_| ())
    }
}

/// Write records as a table whose header comes from the first record.
/// Returns the header and row count; an empty slice writes nothing.
pub fn write_records(path: &Path, records: &[Record]) -> Result<(Vec<String>, usize), DataError> {
    let Some(first) = records.first() else {
        return Ok((Vec::new(), 0));
    };
    let mut flattener = RowFlattener::new();
    let header = flattener.establish(first).to_vec();
    let rows: Vec<Vec<String>> = records.iter().map(|r| flattener.flatten(r)).collect();
    let n = write_table(path, &header, &rows)?;
    Ok((header, n))
}

#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub output: PathBuf,
    pub series: usize,
    pub categories_visited: usize,
    pub checkpoints: usize,
    pub requests: usize,
}

/// Crawl every category under `root` and save all series found.
pub fn run_crawl(
    client: &FredClient<'_>,
    root: u64,
    output: &Path,
    settings: &FredSettings,
) -> Result<CrawlSummary, DataError> {
    info!(root, "starting full FRED crawl");
    let categories = FredCategories::new(client, settings.series_page_size, settings.crawl_delay());
    let mut checkpoint = CsvCheckpoint::new(output);
    let options = CrawlOptions {
        root,
        save_every: settings.save_every,
        delay: settings.crawl_delay(),
    };
    let outcome = crawl_categories(&categories, client.api().sleeper(), options, &mut checkpoint)?;

    let (columns, rows) = write_records(output, &outcome.series)?;
    if rows > 0 {
        RunManifest::for_csv(
            "fred",
            &client.redacted("category/series"),
            output,
            &columns,
            rows,
            outcome.requests,
        )?
        .write()?;
    }
    info!(series = rows, path = %output.display(), "crawl complete");

    Ok(CrawlSummary {
        output: output.to_path_buf(),
        series: rows,
        categories_visited: outcome.categories_visited,
        checkpoints: outcome.checkpoints,
        requests: outcome.requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn series_ids_are_validated() {
        assert!(validate_series_id("GDP").is_ok());
        assert!(validate_series_id("DGS10").is_ok());
        assert!(validate_series_id("").is_err());
        assert!(validate_series_id("GDP; DROP").is_err());
    }

    #[test]
    fn file_stem_uses_metadata_and_range() {
        let meta = json!({
            "id": "GDP",
            "title": "Gross Domestic Product",
            "frequency": "Quarterly",
            "frequency_short": "Q"
        })
        .as_object()
        .cloned()
        .unwrap();

        assert_eq!(
            series_file_stem("GDP", &meta, DateRange::default()),
            "GDP_Q_FULL_LATEST_Gross_Domestic_Product"
        );

        let range = DateRange::new(NaiveDate::from_ymd_opt(2020, 1, 1), None).unwrap();
        assert_eq!(
            series_file_stem("GDP", &meta, range),
            "GDP_Q_2020-01-01_LATEST_Gross_Domestic_Product"
        );
    }

    #[test]
    fn missing_and_non_numeric_values_are_blanked() {
        let rec = |v: &str| json!({"date": "2020-01-01", "value": v}).as_object().cloned().unwrap();
        assert_eq!(clean_observation(rec("."))["value"], Value::Null);
        assert_eq!(clean_observation(rec("n/a"))["value"], Value::Null);
        assert_eq!(clean_observation(rec("1.25"))["value"], "1.25");
    }

    #[test]
    fn list_page_parsing() {
        let body = json!({"count": 3, "offset": 0, "limit": 2, "observations": [{"date": "a"}, {"date": "b"}]});
        let page = parse_list_page(&body, "observations").unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.total, Some(3));
        assert!(parse_list_page(&json!({"error_message": "x"}), "observations").is_none());
    }

    #[test]
    fn children_parsing_skips_malformed_entries() {
        let body = json!({"categories": [
            {"id": 32991, "name": "Money, Banking, & Finance", "parent_id": 0},
            {"name": "no id"},
            {"id": 10, "name": "Population"}
        ]});
        let kids = parse_children(&body).unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].id, 32991);
        assert!(parse_children(&json!({})).is_none());
    }

    #[test]
    fn write_records_uses_first_record_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.csv");
        let records: Vec<Record> = vec![
            json!({"id": "A", "title": "First"}).as_object().cloned().unwrap(),
            json!({"title": "Second", "id": "B", "notes": "x"}).as_object().cloned().unwrap(),
        ];
        let (header, n) = write_records(&path, &records).unwrap();
        assert_eq!(header, vec!["id", "title"]);
        assert_eq!(n, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,title\nA,First\nB,Second\n");
    }

    #[test]
    fn checkpoint_replaces_snapshot_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint = CsvCheckpoint::new(dir.path().join("crawl.csv"));
        let rec = |id: &str| json!({"id": id}).as_object().cloned().unwrap();

        checkpoint.save(&[rec("A")]).unwrap();
        checkpoint.save(&[rec("A"), rec("B")]).unwrap();

        assert_eq!(std::fs::read_to_string(checkpoint.path()).unwrap(), "id\nA\nB\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
