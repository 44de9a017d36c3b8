//! CSV persistence for generated observations and forecast rows.
//!
//! The raw-observation sink appends: the header is written only when the
//! destination file does not exist yet.

use crate::error::Result;
use crate::observation::Observation;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Destination for chunks of generated observations.
pub trait ObservationSink {
    /// Persists `rows` in order. An empty slice is a no-op.
    fn flush(&mut self, rows: &[Observation]) -> Result<()>;
}

/// Appends observation chunks to a CSV file.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    path: PathBuf,
}

impl CsvFileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ObservationSink for CsvFileSink {
    fn flush(&mut self, rows: &[Observation]) -> Result<()> {
        append_records(&self.path, rows)
    }
}

/// Collects flushed chunks in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<Observation>,
    pub flushes: usize,
}

#[cfg(test)]
impl ObservationSink for MemorySink {
    fn flush(&mut self, rows: &[Observation]) -> Result<()> {
        if !rows.is_empty() {
            self.rows.extend_from_slice(rows);
            self.flushes += 1;
        }
        Ok(())
    }
}

/// Appends `records` as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist. Does not touch
/// the file at all when `records` is empty.
pub fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = records.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes `records` to a fresh CSV file at `path`, replacing any previous content.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    debug!(path = %path.display(), rows = records.len(), "Writing CSV records");

    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}
