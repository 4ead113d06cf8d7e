//! File output: CSV tables, JSON sidecars, output naming.

pub mod csv_sink;
pub mod manifest;

pub use csv_sink::{write_table, CsvSink};
pub use manifest::{write_json, RunManifest};

/// Make an arbitrary upstream title safe for use in a file name.
///
/// `/` becomes `-`, whitespace becomes `_`, and the result is capped at
/// `max_chars` characters.
pub fn file_component(raw: &str, max_chars: usize) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            c if c.is_whitespace() => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c => c,
        })
        .take(max_chars)
        .collect()
}
