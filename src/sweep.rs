//! Timestamp sweep: one observation per (timestamp, site, technology),
//! buffered and flushed to a sink in bounded chunks.

use crate::error::{Result, TelemetryError};
use crate::generator::SampleGenerator;
use crate::observation::Observation;
use crate::output::ObservationSink;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

pub const DEFAULT_INTERVAL_SECS: i64 = 600;
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

#[derive(Debug, Clone)]
pub struct TimestampSweep {
    pub start: DateTime<Utc>,
    /// Inclusive upper bound.
    pub end: DateTime<Utc>,
    pub interval: Duration,
    /// Buffered rows that trigger a flush.
    pub chunk_size: usize,
}

/// Counts reported once a sweep finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub timestamps: usize,
    pub rows: usize,
    pub flushes: usize,
}

impl TimestampSweep {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            interval: Duration::seconds(DEFAULT_INTERVAL_SECS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Runs the sweep, iterating sites then technologies in declared order.
    ///
    /// The parameter tables are validated before the first row is drawn, so a
    /// missing entry never leaves a partially written destination behind.
    pub fn run<S: ObservationSink>(
        &self,
        generator: &mut SampleGenerator<'_>,
        sink: &mut S,
    ) -> Result<SweepSummary> {
        if self.interval <= Duration::zero() {
            return Err(TelemetryError::InvalidParameter(format!(
                "interval must be positive, got {}s",
                self.interval.num_seconds()
            )));
        }
        if self.chunk_size == 0 {
            return Err(TelemetryError::InvalidParameter(
                "chunk size must be at least one row".to_string(),
            ));
        }
        let params = generator.params();
        params.validate()?;

        info!(start = %self.start, end = %self.end, "Generating data");

        let mut summary = SweepSummary::default();
        let mut buffer = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        let mut current = self.start;

        while current <= self.end {
            for site in &params.sites {
                for tech in &params.technologies {
                    buffer.push(generator.sample(site, tech, current)?);

                    if buffer.len() >= self.chunk_size {
                        self.flush(sink, &mut buffer, &mut summary)?;
                    }
                }
            }
            summary.timestamps += 1;

            match current.checked_add_signed(self.interval) {
                Some(next) => current = next,
                None => break,
            }
        }

        // Final flush is unconditional; an empty buffer makes it a no-op.
        self.flush(sink, &mut buffer, &mut summary)?;

        info!(
            timestamps = summary.timestamps,
            rows = summary.rows,
            flushes = summary.flushes,
            "Data generation complete"
        );
        Ok(summary)
    }

    fn flush<S: ObservationSink>(
        &self,
        sink: &mut S,
        buffer: &mut Vec<Observation>,
        summary: &mut SweepSummary,
    ) -> Result<()> {
        sink.flush(buffer.as_slice())?;
        if !buffer.is_empty() {
            summary.rows += buffer.len();
            summary.flushes += 1;
            debug!(rows = buffer.len(), total = summary.rows, "Flushed chunk");
        }
        buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::output::{CsvFileSink, MemorySink};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_ten_timestamps_yield_one_row_per_combination() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);
        let mut sink = MemorySink::default();

        let sweep = TimestampSweep::new(t0(), t0() + Duration::seconds(600 * 9));
        let summary = sweep.run(&mut generator, &mut sink).unwrap();

        assert_eq!(summary.timestamps, 10);
        assert_eq!(summary.rows, 10 * 4 * 6);
        assert_eq!(sink.rows.len(), 240);

        let keys: HashSet<_> = sink
            .rows
            .iter()
            .map(|o| (o.timestamp, o.site.clone(), o.technology.clone()))
            .collect();
        assert_eq!(keys.len(), 240);
    }

    #[test]
    fn test_rows_follow_declared_order() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);
        let mut sink = MemorySink::default();

        TimestampSweep::new(t0(), t0() + Duration::seconds(600))
            .run(&mut generator, &mut sink)
            .unwrap();

        let first: Vec<_> = sink.rows[..7]
            .iter()
            .map(|o| (o.site.as_str(), o.technology.as_str()))
            .collect();
        assert_eq!(
            first,
            vec![
                ("Site_A", "2G"),
                ("Site_A", "3G"),
                ("Site_A", "4G"),
                ("Site_A", "5G"),
                ("Site_A", "LTE"),
                ("Site_A", "WiFi"),
                ("Site_B", "2G"),
            ]
        );
        assert_eq!(sink.rows[24].timestamp, t0() + Duration::seconds(600));
    }

    #[test]
    fn test_end_is_inclusive_only_on_grid() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);
        let mut sink = MemorySink::default();

        let summary = TimestampSweep::new(t0(), t0() + Duration::seconds(1199))
            .run(&mut generator, &mut sink)
            .unwrap();
        assert_eq!(summary.timestamps, 2);
    }

    #[test]
    fn test_chunking_flushes_at_threshold() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);
        let mut sink = MemorySink::default();

        // 3 timestamps * 24 rows = 72 rows -> 50 + 22
        let summary = TimestampSweep::new(t0(), t0() + Duration::seconds(1200))
            .with_chunk_size(50)
            .run(&mut generator, &mut sink)
            .unwrap();

        assert_eq!(summary.rows, 72);
        assert_eq!(summary.flushes, 2);
        assert_eq!(sink.flushes, 2);
    }

    #[test]
    fn test_start_after_end_produces_nothing() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);
        let mut sink = MemorySink::default();

        let summary = TimestampSweep::new(t0(), t0() - Duration::seconds(1))
            .run(&mut generator, &mut sink)
            .unwrap();
        assert_eq!(summary, SweepSummary::default());
    }

    #[test]
    fn test_threshold_one_writes_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let mut config = TelemetryConfig::default();
        config.sites.truncate(1);
        config.technologies.truncate(1);
        let mut generator = SampleGenerator::new(&config, 9);
        let mut sink = CsvFileSink::new(&path);

        let summary = TimestampSweep::new(t0(), t0() + Duration::seconds(600))
            .with_chunk_size(1)
            .run(&mut generator, &mut sink)
            .unwrap();
        assert_eq!(summary.flushes, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,"));
        assert!(lines[1].starts_with("2025-01-01T00:00:00Z,Site_A,2G,"));
        assert!(lines[2].starts_with("2025-01-01T00:10:00Z,Site_A,2G,"));
    }

    #[test]
    fn test_missing_table_entry_fails_before_any_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let mut config = TelemetryConfig::default();
        config.base_temperature.remove("Site_D");
        let mut generator = SampleGenerator::new(&config, 9);

        let err = TimestampSweep::new(t0(), t0())
            .with_chunk_size(1)
            .run(&mut generator, &mut CsvFileSink::new(&path))
            .unwrap_err();

        assert!(matches!(err, TelemetryError::Configuration { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);

        let err = TimestampSweep::new(t0(), t0())
            .with_interval(Duration::zero())
            .run(&mut generator, &mut MemorySink::default())
            .unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidParameter(_)));
    }
}
