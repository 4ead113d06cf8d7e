//! Single-writer CSV output with a header written exactly once.
//!
//! Rows go to a temporary file beside the target, which replaces the target
//! only in [`CsvSink::finish`]. An interrupted write leaves the previous file
//! untouched.

use crate::error::DataError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// CSV file writer. The header must be written before any row, and only once.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<NamedTempFile>,
    columns: Option<Vec<String>>,
    rows: usize,
}

impl CsvSink {
    /// Start writing `path`, creating parent directories as needed. The file
    /// itself is not replaced until `finish`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;
        let dir = parent_dir(&path);
        let file = NamedTempFile::new_in(dir).map_err(|e| DataError::io(dir, e))?;
        Ok(Self {
            path,
            writer: csv::Writer::from_writer(file),
            columns: None,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_header(&self) -> bool {
        self.columns.is_some()
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write_header<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<(), DataError> {
        if self.columns.is_some() {
            return Err(DataError::Csv(csv_error(format!(
                "header already written to {}",
                self.path.display()
            ))));
        }
        self.writer
            .write_record(columns.iter().map(|c| c.as_ref()))?;
        self.columns = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        Ok(())
    }

    pub fn write_row<S: AsRef<str>>(&mut self, row: &[S]) -> Result<(), DataError> {
        if self.columns.is_none() {
            return Err(DataError::Csv(csv_error(format!(
                "row written before header to {}",
                self.path.display()
            ))));
        }
        self.writer.write_record(row.iter().map(|c| c.as_ref()))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush, move the finished file over `path`, and return the number of
    /// data rows written. Dropping the sink instead discards its rows.
    pub fn finish(self) -> Result<usize, DataError> {
        let Self {
            path, writer, rows, ..
        } = self;
        let file = writer
            .into_inner()
            .map_err(|e| DataError::io(&path, e.into_error()))?;
        file.as_file()
            .sync_all()
            .map_err(|e| DataError::io(&path, e))?;
        file.persist(&path).map_err(|e| DataError::io(&path, e.error))?;
        Ok(rows)
    }
}

fn csv_error(message: String) -> csv::Error {
    csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
}

/// Write a full table (header + rows) in one go, replacing any existing file.
pub fn write_table<S: AsRef<str>>(
    path: impl AsRef<Path>,
    header: &[S],
    rows: &[Vec<String>],
) -> Result<usize, DataError> {
    let mut sink = CsvSink::create(path)?;
    sink.write_header(header)?;
    for row in rows {
        sink.write_row(row)?;
    }
    sink.finish()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), DataError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| DataError::io(dir, e))
        }
        _ => Ok(()),
    }
}
