//! Company fundamentals from Yahoo's fundamentals-timeseries endpoint.
//!
//! Each statement is one request listing the line items wanted
//! (`type=annualTotalRevenue,annualNetIncome,...`). The response holds one
//! result per line item; they are pivoted into a table with the line item in
//! an `index` column and one column per as-of date, newest first.

use super::yahoo::validate_ticker;
use crate::config::YahooSettings;
use crate::error::{ConfigError, DataError};
use crate::fetch::{ApiClient, Query};
use crate::output::write_table;
use crate::record::cell;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

/// 1985-08-23, the earliest period Yahoo reports fundamentals for.
const EARLIEST_PERIOD: i64 = 493_590_046;

const INCOME_ITEMS: &[&str] = &[
    "TotalRevenue",
    "CostOfRevenue",
    "GrossProfit",
    "ResearchAndDevelopment",
    "SellingGeneralAndAdministration",
    "OperatingExpense",
    "OperatingIncome",
    "InterestExpense",
    "PretaxIncome",
    "TaxProvision",
    "NetIncome",
    "EBITDA",
    "BasicEPS",
    "DilutedEPS",
];

const BALANCE_ITEMS: &[&str] = &[
    "TotalAssets",
    "CurrentAssets",
    "CashAndCashEquivalents",
    "AccountsReceivable",
    "Inventory",
    "NetPPE",
    "TotalLiabilitiesNetMinorityInterest",
    "CurrentLiabilities",
    "AccountsPayable",
    "LongTermDebt",
    "TotalDebt",
    "RetainedEarnings",
    "StockholdersEquity",
];

const CASHFLOW_ITEMS: &[&str] = &[
    "OperatingCashFlow",
    "DepreciationAndAmortization",
    "ChangeInWorkingCapital",
    "InvestingCashFlow",
    "CapitalExpenditure",
    "FinancingCashFlow",
    "RepurchaseOfCapitalStock",
    "CashDividendsPaid",
    "FreeCashFlow",
];

const EARNINGS_ITEMS: &[&str] = &["TotalRevenue", "NetIncome", "BasicEPS", "DilutedEPS"];

/// Reporting frequency of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Annual,
    Quarterly,
}

impl Frequency {
    fn prefix(self) -> &'static str {
        match self {
            Frequency::Annual => "annual",
            Frequency::Quarterly => "quarterly",
        }
    }
}

/// One saved table: a statement at one frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dataset {
    pub name: &'static str,
    pub frequency: Frequency,
    pub items: &'static [&'static str],
}

impl Dataset {
    /// Timeseries `type` values, e.g. `annualTotalRevenue`.
    pub fn types(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|item| format!("{}{item}", self.frequency.prefix()))
            .collect()
    }
}

/// The eight datasets saved per ticker, in output order.
pub const DATASETS: [Dataset; 8] = [
    Dataset { name: "financials_annual", frequency: Frequency::Annual, items: INCOME_ITEMS },
    Dataset { name: "financials_quarterly", frequency: Frequency::Quarterly, items: INCOME_ITEMS },
    Dataset { name: "balance_annual", frequency: Frequency::Annual, items: BALANCE_ITEMS },
    Dataset { name: "balance_quarterly", frequency: Frequency::Quarterly, items: BALANCE_ITEMS },
    Dataset { name: "cashflow_annual", frequency: Frequency::Annual, items: CASHFLOW_ITEMS },
    Dataset { name: "cashflow_quarterly", frequency: Frequency::Quarterly, items: CASHFLOW_ITEMS },
    Dataset { name: "earnings_annual", frequency: Frequency::Annual, items: EARNINGS_ITEMS },
    Dataset { name: "earnings_quarterly", frequency: Frequency::Quarterly, items: EARNINGS_ITEMS },
];

/// A pivoted statement: `rows[i]` holds `index[i]`'s value per date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementTable {
    pub index: Vec<String>,
    /// As-of dates, newest first.
    pub dates: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StatementTable {
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn header(&self) -> Vec<String> {
        std::iter::once("index".to_string())
            .chain(self.dates.iter().cloned())
            .collect()
    }

    fn csv_rows(&self) -> Vec<Vec<String>> {
        self.index
            .iter()
            .zip(&self.rows)
            .map(|(name, values)| std::iter::once(name.clone()).chain(values.iter().cloned()).collect())
            .collect()
    }
}

/// Pivot a timeseries body into a table for `dataset`.
///
/// Line items keep the dataset's order; items with no reported values are
/// left out. A body without `timeseries.result` is a format change.
pub fn parse_statement(dataset: &Dataset, body: &Value) -> Result<StatementTable, DataError> {
    let results = body
        .pointer("/timeseries/result")
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::ResponseFormatChanged("timeseries.result missing".into()))?;

    let prefix = dataset.frequency.prefix();
    let mut by_item: BTreeMap<&str, BTreeMap<String, String>> = BTreeMap::new();
    let mut dates = BTreeSet::new();

    for result in results {
        let Some(type_name) = result.pointer("/meta/type/0").and_then(Value::as_str) else {
            continue;
        };
        let Some(item) = type_name
            .strip_prefix(prefix)
            .and_then(|item| dataset.items.iter().find(|&&known| known == item))
        else {
            continue;
        };
        let Some(points) = result.get(type_name).and_then(Value::as_array) else {
            continue;
        };
        for point in points {
            let (Some(date), Some(raw)) = (
                point.get("asOfDate").and_then(Value::as_str),
                point.pointer("/reportedValue/raw"),
            ) else {
                continue;
            };
            dates.insert(date.to_string());
            by_item
                .entry(*item)
                .or_default()
                .insert(date.to_string(), cell(raw));
        }
    }

    let dates: Vec<String> = dates.into_iter().rev().collect();
    let mut table = StatementTable {
        dates,
        ..StatementTable::default()
    };
    for item in dataset.items {
        if let Some(values) = by_item.get(item) {
            table.index.push(item.to_string());
            table.rows.push(
                table
                    .dates
                    .iter()
                    .map(|d| values.get(d).cloned().unwrap_or_default())
                    .collect(),
            );
        }
    }
    Ok(table)
}

/// Outcome per dataset: where it was saved, or `None` if empty.
#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub name: &'static str,
    pub rows: usize,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FundamentalsSummary {
    pub ticker: String,
    pub datasets: Vec<DatasetOutcome>,
}

impl FundamentalsSummary {
    pub fn saved(&self) -> usize {
        self.datasets.iter().filter(|d| d.output.is_some()).count()
    }
}

pub fn timeseries_endpoint(settings: &YahooSettings, ticker: &str) -> Result<Url, ConfigError> {
    let raw = format!("{}/{}", settings.fundamentals_url.trim_end_matches('/'), ticker);
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
        value: raw,
        reason: e.to_string(),
    })
}

/// Fetch and save all eight datasets as `{ticker}_{dataset}.csv`.
pub fn run_fundamentals(
    client: &ApiClient<'_>,
    ticker: &str,
    output_dir: &Path,
    settings: &YahooSettings,
    now: DateTime<Utc>,
) -> Result<FundamentalsSummary, DataError> {
    let ticker = ticker.trim().to_uppercase();
    validate_ticker(&ticker)?;
    let endpoint = timeseries_endpoint(settings, &ticker)?;
    info!(ticker = %ticker, "fetching fundamentals");

    let mut outcomes = Vec::with_capacity(DATASETS.len());
    for dataset in &DATASETS {
        let mut query = Query::new();
        query.set("symbol", ticker.as_str());
        query.set("type", dataset.types().join(","));
        query.set("period1", EARLIEST_PERIOD.to_string());
        query.set("period2", now.timestamp().to_string());

        let body = client.get_json(&endpoint, &query)?;
        let table = parse_statement(dataset, &body)?;
        if table.is_empty() {
            info!(dataset = dataset.name, ticker = %ticker, "no data available");
            outcomes.push(DatasetOutcome {
                name: dataset.name,
                rows: 0,
                output: None,
            });
            continue;
        }

        let path = output_dir.join(format!("{ticker}_{}.csv", dataset.name));
        let rows = write_table(&path, &table.header(), &table.csv_rows())?;
        info!(dataset = dataset.name, rows, path = %path.display(), "saved");
        outcomes.push(DatasetOutcome {
            name: dataset.name,
            rows,
            output: Some(path),
        });
    }

    Ok(FundamentalsSummary {
        ticker,
        datasets: outcomes,
    })
}
