use crate::aggregation::AggregatedTable;
use crate::aggregation::types::{Cell, DS, SITE_PREFIX, Y, column_index};
use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Duration, Utc};
use std::io::Read;
use std::path::Path;

const SITE: &str = "site";

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub ds: DateTime<Utc>,
    /// Label carried through to the prediction output.
    pub site: Option<String>,
    /// One value per [`FutureFrame::columns`]; `None` marks an empty cell.
    pub values: Vec<Option<f64>>,
}

/// Future time index plus whatever regressor values are known for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FutureFrame {
    pub columns: Vec<String>,
    pub rows: Vec<FrameRow>,
}

impl FutureFrame {
    /// Uses the actual regressor values of an aggregated table.
    pub fn from_table(table: &AggregatedTable) -> Self {
        Self {
            columns: table.regressor_columns(),
            rows: table
                .records
                .iter()
                .map(|record| FrameRow {
                    ds: record.ds,
                    site: table.site_of(record).map(str::to_string),
                    values: table
                        .regressor_values(record)
                        .into_iter()
                        .map(Some)
                        .collect(),
                })
                .collect(),
        }
    }

    /// `periods` hours after the end of `history`, one row per site.
    ///
    /// Only the site indicators are known; every other regressor is left
    /// empty for the fill policy to handle.
    pub fn hourly_per_site(history: &AggregatedTable, periods: usize) -> Result<Self> {
        let end = history.history_end().ok_or_else(|| {
            TelemetryError::InvalidParameter(
                "cannot build a forecast horizon from an empty history".to_string(),
            )
        })?;
        let columns = history.regressor_columns();
        let site_count = history.site_columns.len();
        let mut rows = Vec::with_capacity(periods * site_count.max(1));

        for step in 1..=periods {
            let ds = end + Duration::hours(step as i64);

            if site_count == 0 {
                rows.push(FrameRow {
                    ds,
                    site: None,
                    values: vec![None; columns.len()],
                });
                continue;
            }

            for (index, site) in history.sites().into_iter().enumerate() {
                let values = columns
                    .iter()
                    .map(|column| {
                        let position = history.site_columns.iter().position(|c| c == column)?;
                        Some(if position == index { 1.0 } else { 0.0 })
                    })
                    .collect();
                rows.push(FrameRow {
                    ds,
                    site: Some(site.to_string()),
                    values,
                });
            }
        }

        Ok(Self { columns, rows })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    /// Reads a CSV with a `ds` column, an optional `site` label, and one
    /// column per regressor. Empty cells are kept as missing values; a `y`
    /// column is ignored.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();

        let ds = column_index(&headers, DS)?;
        let site = headers.iter().position(|h| h == SITE);
        let regressors: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| *h != DS && *h != SITE && *h != Y)
            .map(|(i, h)| (i, h.to_string()))
            .collect();
        let columns: Vec<String> = regressors.iter().map(|(_, name)| name.clone()).collect();

        let mut rows = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            let cell = Cell { record: &record, headers: &headers, row };

            let values: Vec<Option<f64>> = regressors
                .iter()
                .map(|(i, _)| cell.optional_number(*i))
                .collect::<Result<_>>()?;
            let label = match site {
                Some(i) if !cell.text(i)?.is_empty() => Some(cell.text(i)?.to_string()),
                _ => site_from_indicators(&columns, &values),
            };

            rows.push(FrameRow {
                ds: cell.timestamp(ds)?,
                site: label,
                values,
            });
        }

        Ok(Self { columns, rows })
    }

    /// Positions of `regressors` within [`Self::columns`].
    ///
    /// Fails unless both column sets match exactly, in any order.
    pub fn align(&self, regressors: &[String]) -> Result<Vec<usize>> {
        let missing: Vec<String> = regressors
            .iter()
            .filter(|r| !self.columns.contains(r))
            .cloned()
            .collect();
        let unexpected: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !regressors.contains(c))
            .cloned()
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(TelemetryError::RegressorMismatch {
                missing,
                unexpected,
            });
        }

        Ok(regressors
            .iter()
            .filter_map(|r| self.columns.iter().position(|c| c == r))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn site_from_indicators(columns: &[String], values: &[Option<f64>]) -> Option<String> {
    columns
        .iter()
        .zip(values)
        .find(|(column, value)| column.starts_with(SITE_PREFIX) && **value == Some(1.0))
        .and_then(|(column, _)| column.strip_prefix(SITE_PREFIX))
        .map(str::to_string)
}
