//! Tables flowing through the aggregation step, with their CSV codecs.
//!
//! Both tables carry a dynamic column set (technology indicators, one-hot
//! sites), so rows are read and written by header name rather than through
//! a fixed serde struct.

use crate::aggregation::utility::{format_float, format_timestamp, parse_timestamp};
use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use std::io::{Read, Write};
use std::path::Path;

/// Raw columns prefixed with this are summed per group.
pub const TECH_PREFIX: &str = "tech_";
/// One-hot site columns are named `site_<value>`.
pub const SITE_PREFIX: &str = "site_";

pub const DS: &str = "ds";
pub const Y: &str = "y";
pub const RESOURCE_BLOCK_LOAD: &str = "resource_block_load";
pub const USERS: &str = "users";

/// A raw row as seen by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,
    pub site: String,
    pub technology: String,
    pub users: u64,
    pub resource_block_load: u64,
    pub temperature: f64,
    /// Values for [`RawTable::indicator_columns`], same order.
    pub indicators: Vec<f64>,
}

/// Raw per-technology telemetry plus any `tech_*` indicator columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub indicator_columns: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    /// Reads a raw CSV, rejecting missing columns and non-numeric values.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();

        let timestamp = column_index(&headers, "timestamp")?;
        let site = column_index(&headers, "site")?;
        let technology = column_index(&headers, "technology")?;
        let users = column_index(&headers, USERS)?;
        let rrb = column_index(&headers, RESOURCE_BLOCK_LOAD)?;
        let temperature = column_index(&headers, "temperature")?;

        let indicators: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.starts_with(TECH_PREFIX))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut records = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            let cell = Cell { record: &record, headers: &headers, row };

            records.push(RawRecord {
                timestamp: cell.timestamp(timestamp)?,
                site: cell.text(site)?.to_string(),
                technology: cell.text(technology)?.to_string(),
                users: cell.count(users)?,
                resource_block_load: cell.count(rrb)?,
                temperature: cell.number(temperature)?,
                indicators: indicators
                    .iter()
                    .map(|(i, _)| cell.number(*i))
                    .collect::<Result<_>>()?,
            });
        }

        Ok(Self {
            indicator_columns: indicators.into_iter().map(|(_, name)| name).collect(),
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One row per (hour, site).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    pub ds: DateTime<Utc>,
    /// Mean temperature.
    pub y: f64,
    pub resource_block_load: f64,
    pub users: u64,
    /// Sums for [`AggregatedTable::indicator_columns`], same order.
    pub indicators: Vec<f64>,
    /// One-hot values for [`AggregatedTable::site_columns`], same order.
    pub sites: Vec<u8>,
}

/// Hourly per-site table in forecasting layout:
/// `ds, y, resource_block_load, users, tech_*..., site_*...`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedTable {
    pub indicator_columns: Vec<String>,
    pub site_columns: Vec<String>,
    pub records: Vec<AggregatedRecord>,
}

impl AggregatedTable {
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![DS.to_string(), Y.to_string()];
        columns.extend(self.regressor_columns());
        columns
    }

    /// Exogenous inputs in model order.
    pub fn regressor_columns(&self) -> Vec<String> {
        let mut columns = vec![RESOURCE_BLOCK_LOAD.to_string(), USERS.to_string()];
        columns.extend(self.indicator_columns.iter().cloned());
        columns.extend(self.site_columns.iter().cloned());
        columns
    }

    /// Values for [`Self::regressor_columns`] of `record`.
    pub fn regressor_values(&self, record: &AggregatedRecord) -> Vec<f64> {
        let mut values = vec![record.resource_block_load, record.users as f64];
        values.extend(record.indicators.iter().copied());
        values.extend(record.sites.iter().map(|v| *v as f64));
        values
    }

    /// The site whose indicator is set on `record`, if any.
    pub fn site_of(&self, record: &AggregatedRecord) -> Option<&str> {
        record
            .sites
            .iter()
            .position(|v| *v == 1)
            .and_then(|i| self.site_columns.get(i))
            .map(|column| column.strip_prefix(SITE_PREFIX).unwrap_or(column))
    }

    /// Site names in column order.
    pub fn sites(&self) -> Vec<&str> {
        self.site_columns
            .iter()
            .map(|c| c.strip_prefix(SITE_PREFIX).unwrap_or(c))
            .collect()
    }

    /// Fails unless every record carries one value per indicator and site column.
    pub fn check_widths(&self) -> Result<()> {
        let indicators = self.indicator_columns.len();
        let sites = self.site_columns.len();
        for record in &self.records {
            if record.indicators.len() != indicators || record.sites.len() != sites {
                return Err(TelemetryError::Schema(format!(
                    "record at {} has {} indicator and {} site values, expected {indicators} and {sites}",
                    record.ds,
                    record.indicators.len(),
                    record.sites.len()
                )));
            }
        }
        Ok(())
    }

    pub fn history_end(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.ds).max()
    }

    /// Splits into rows before `at` and rows at or after it, keeping the schema.
    pub fn split_at(&self, at: DateTime<Utc>) -> (Self, Self) {
        let (before, after): (Vec<_>, Vec<_>) =
            self.records.iter().cloned().partition(|r| r.ds < at);
        let with = |records| Self {
            indicator_columns: self.indicator_columns.clone(),
            site_columns: self.site_columns.clone(),
            records,
        };
        (with(before), with(after))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn write_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_to(std::fs::File::create(path)?)
    }

    /// Writes the header even when there are no rows.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns())?;

        for record in &self.records {
            let mut row = vec![
                format_timestamp(&record.ds),
                format_float(record.y),
                format_float(record.resource_block_load),
                record.users.to_string(),
            ];
            row.extend(record.indicators.iter().map(|v| format_float(*v)));
            row.extend(record.sites.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();

        let ds = column_index(&headers, DS)?;
        let y = column_index(&headers, Y)?;
        let rrb = column_index(&headers, RESOURCE_BLOCK_LOAD)?;
        let users = column_index(&headers, USERS)?;
        let prefixed = |prefix: &str| -> Vec<(usize, String)> {
            headers
                .iter()
                .enumerate()
                .filter(|(_, h)| h.starts_with(prefix))
                .map(|(i, h)| (i, h.to_string()))
                .collect()
        };
        let indicators = prefixed(TECH_PREFIX);
        let sites = prefixed(SITE_PREFIX);

        let mut records = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            let cell = Cell { record: &record, headers: &headers, row };

            records.push(AggregatedRecord {
                ds: cell.timestamp(ds)?,
                y: cell.number(y)?,
                resource_block_load: cell.number(rrb)?,
                users: cell.count(users)?,
                indicators: indicators
                    .iter()
                    .map(|(i, _)| cell.number(*i))
                    .collect::<Result<_>>()?,
                sites: sites
                    .iter()
                    .map(|(i, _)| cell.flag(*i))
                    .collect::<Result<_>>()?,
            });
        }

        Ok(Self {
            indicator_columns: indicators.into_iter().map(|(_, name)| name).collect(),
            site_columns: sites.into_iter().map(|(_, name)| name).collect(),
            records,
        })
    }
}

pub(crate) fn column_index(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| TelemetryError::Schema(format!("missing column `{name}`")))
}

/// Typed access to one CSV row, producing schema errors that name the
/// offending row and column.
pub(crate) struct Cell<'r> {
    pub(crate) record: &'r StringRecord,
    pub(crate) headers: &'r StringRecord,
    /// Zero-based data row (header excluded).
    pub(crate) row: usize,
}

impl<'r> Cell<'r> {
    pub(crate) fn text(&self, index: usize) -> Result<&'r str> {
        self.record
            .get(index)
            .map(str::trim)
            .ok_or_else(|| self.error(index, "", "is missing"))
    }

    pub(crate) fn number(&self, index: usize) -> Result<f64> {
        let value = self.text(index)?;
        match value.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(self.error(index, value, "is not numeric")),
        }
    }

    /// A number that may be left empty.
    pub(crate) fn optional_number(&self, index: usize) -> Result<Option<f64>> {
        if self.text(index)?.is_empty() {
            Ok(None)
        } else {
            self.number(index).map(Some)
        }
    }

    pub(crate) fn count(&self, index: usize) -> Result<u64> {
        let value = self.text(index)?;
        value
            .parse::<u64>()
            .map_err(|_| self.error(index, value, "is not a non-negative integer"))
    }

    pub(crate) fn flag(&self, index: usize) -> Result<u8> {
        match self.text(index)? {
            "0" => Ok(0),
            "1" => Ok(1),
            other => Err(self.error(index, other, "is not a 0/1 indicator")),
        }
    }

    pub(crate) fn timestamp(&self, index: usize) -> Result<DateTime<Utc>> {
        let value = self.text(index)?;
        parse_timestamp(value).ok_or_else(|| self.error(index, value, "is not a timestamp"))
    }

    fn error(&self, index: usize, value: &str, problem: &str) -> TelemetryError {
        let column = self.headers.get(index).unwrap_or("?");
        TelemetryError::Schema(format!(
            "row {}: column `{column}` value `{value}` {problem}",
            self.row + 1
        ))
    }
}
