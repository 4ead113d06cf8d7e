//! Flattening schema-less records into fixed-order CSV rows.

use crate::fetch::Record;
use chrono::NaiveDate;
use serde_json::Value;

/// A column computed from another column of the same record.
#[derive(Clone, Copy)]
pub struct DerivedColumn {
    /// Column the value is computed from.
    pub source: &'static str,
    /// Name of the computed column.
    pub name: &'static str,
    pub derive: fn(&str) -> String,
}

impl std::fmt::Debug for DerivedColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedColumn")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DerivedColumn {
    /// EIA-style `period` → `timestamp` expansion.
    pub fn period_timestamp() -> Self {
        Self {
            source: "period",
            name: "timestamp",
            derive: expand_period,
        }
    }
}

/// Turns records into rows ordered by a header fixed on the first record.
///
/// Later records missing a header field yield an empty cell; fields that were
/// not in the first record are dropped.
#[derive(Debug, Clone, Default)]
pub struct RowFlattener {
    header: Option<Vec<String>>,
    derived: Option<DerivedColumn>,
}

impl RowFlattener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_derived(mut self, derived: DerivedColumn) -> Self {
        self.derived = Some(derived);
        self
    }

    /// Use a fixed header instead of discovering one from the first record.
    pub fn with_header<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Return the header, establishing it from `first` if not yet fixed.
    ///
    /// The derived column goes right after its source column, or last when
    /// the source column is absent. It is not added twice if the upstream
    /// already provides a field with the same name.
    pub fn establish(&mut self, first: &Record) -> &[String] {
        let derived = self.derived;
        self.header.get_or_insert_with(|| {
            let mut columns: Vec<String> = first.keys().cloned().collect();
            if let Some(d) = derived {
                if !columns.iter().any(|c| c == d.name) {
                    match columns.iter().position(|c| c == d.source) {
                        Some(idx) => columns.insert(idx + 1, d.name.to_string()),
                        None => columns.push(d.name.to_string()),
                    }
                }
            }
            columns
        })
    }

    /// Flatten one record. Establishes the header first if needed.
    pub fn flatten(&mut self, record: &Record) -> Vec<String> {
        let derived = self.derived;
        let header = self.establish(record);
        header
            .iter()
            .map(|column| match derived {
                Some(d) if column == d.name && !record.contains_key(d.name) => {
                    let raw = record.get(d.source).map(cell).unwrap_or_default();
                    (d.derive)(&raw)
                }
                _ => record.get(column).map(cell).unwrap_or_default(),
            })
            .collect()
    }
}

/// Render a JSON value as a CSV cell.
///
/// Strings are written unquoted, `null` is empty, nested values become
/// compact JSON.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Expand a compact hourly period into a full timestamp.
///
/// `"2024-12-31T00"` becomes `"2024-12-31 00:00:00"`. Anything that does not
/// parse as `YYYY-MM-DDTHH` comes back unchanged.
pub fn expand_period(raw: &str) -> String {
    parse_hourly_period(raw)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn parse_hourly_period(raw: &str) -> Option<chrono::NaiveDateTime> {
    let (date, hour) = raw.split_once('T')?;
    if hour.is_empty() || hour.len() > 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    date.and_hms_opt(hour.parse().ok()?, 0, 0)
}
