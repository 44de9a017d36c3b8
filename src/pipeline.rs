//! The generate, aggregate, train and forecast steps, shared by the CLI
//! subcommands and the one-shot `run` pass.

use crate::aggregation::aggregate::floor_to_hour;
use crate::aggregation::{AggregatedTable, RawTable, aggregate};
use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::forecast::{FillPolicy, FittedModel, ForecastModel, FutureFrame, Prediction};
use crate::generator::SampleGenerator;
use crate::metrics::{ForecastAccuracy, forecast_accuracy};
use crate::output::{CsvFileSink, write_records};
use crate::sweep::{SweepSummary, TimestampSweep};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Destinations used by [`run`].
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub raw: PathBuf,
    pub aggregated: PathBuf,
    pub forecast: PathBuf,
}

/// Result of [`train`].
#[derive(Debug)]
pub struct TrainOutcome<F> {
    pub fitted: F,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Held-out predictions, present when a split was requested.
    pub test_predictions: Vec<Prediction>,
    pub accuracy: Option<ForecastAccuracy>,
}

/// Sweeps the configured sites and technologies into a raw CSV, appending to
/// it when it already exists.
#[tracing::instrument(skip(config, sweep), fields(output = %output.display()))]
pub fn generate(
    config: &TelemetryConfig,
    sweep: &TimestampSweep,
    seed: u64,
    output: &Path,
) -> Result<SweepSummary> {
    ensure_parent(output)?;

    let mut generator = SampleGenerator::new(config, seed);
    let mut sink = CsvFileSink::new(output);
    sweep.run(&mut generator, &mut sink)
}

/// Reads a raw CSV and rewrites it as the hourly aggregated table.
#[tracing::instrument(fields(input = %input.display(), output = %output.display()))]
pub fn aggregate_file(input: &Path, output: &Path) -> Result<AggregatedTable> {
    let raw = RawTable::from_path(input)?;
    let table = aggregate(&raw)?;

    ensure_parent(output)?;
    table.write_path(output)?;

    info!(
        raw_rows = raw.len(),
        hourly_rows = table.len(),
        sites = table.site_columns.len(),
        "Aggregation complete"
    );
    Ok(table)
}

/// Fits `model` on `table`.
///
/// With a `split`, rows before it train the model and the rest are predicted
/// with their actual regressors to measure accuracy.
#[tracing::instrument(skip(model, table), fields(model = model.name(), rows = table.len()))]
pub fn train<M: ForecastModel>(
    model: &M,
    table: &AggregatedTable,
    split: Option<DateTime<Utc>>,
) -> Result<TrainOutcome<M::Fitted>> {
    let Some(split) = split else {
        let fitted = model.fit(table)?;
        return Ok(TrainOutcome {
            fitted,
            train_rows: table.len(),
            test_rows: 0,
            test_predictions: Vec::new(),
            accuracy: None,
        });
    };

    let (train_set, test_set) = table.split_at(split);
    if train_set.is_empty() || test_set.is_empty() {
        return Err(TelemetryError::InvalidParameter(format!(
            "split at {split} leaves {} training and {} test rows",
            train_set.len(),
            test_set.len()
        )));
    }

    let fitted = model.fit(&train_set)?;
    let test_predictions =
        fitted.predict(&FutureFrame::from_table(&test_set), FillPolicy::Reject)?;

    let predicted: Vec<f64> = test_predictions.iter().map(|p| p.yhat).collect();
    let actual: Vec<f64> = test_set.records.iter().map(|r| r.y).collect();
    let accuracy = forecast_accuracy(&predicted, &actual)?;

    info!(
        train_rows = train_set.len(),
        test_rows = test_set.len(),
        mae = accuracy.mae,
        mse = accuracy.mse,
        rmse = accuracy.rmse,
        "Held-out evaluation"
    );

    Ok(TrainOutcome {
        fitted,
        train_rows: train_set.len(),
        test_rows: test_set.len(),
        test_predictions,
        accuracy: Some(accuracy),
    })
}

/// Predicts every row of `frame` and writes the forecast CSV.
#[tracing::instrument(skip(fitted, frame), fields(rows = frame.len(), policy = %policy, output = %output.display()))]
pub fn forecast<F: FittedModel>(
    fitted: &F,
    frame: &FutureFrame,
    policy: FillPolicy,
    output: &Path,
) -> Result<Vec<Prediction>> {
    let history_end = fitted.history_end();
    let overlapping = frame.rows.iter().filter(|r| r.ds <= history_end).count();
    if overlapping > 0 {
        warn!(rows = overlapping, %history_end, "Forecast rows fall inside the fitted history");
    }

    let predictions = fitted.predict(frame, policy)?;

    ensure_parent(output)?;
    write_records(output, &predictions)?;

    info!(rows = predictions.len(), "Forecast written");
    Ok(predictions)
}

/// One pass of the scheduled job: generate a day of telemetry starting at the
/// hour containing `now`, aggregate it, and forecast those 24 hours with the
/// observed regressors.
#[tracing::instrument(skip(config, fitted, paths))]
pub fn run<F: FittedModel>(
    config: &TelemetryConfig,
    fitted: &F,
    now: DateTime<Utc>,
    seed: u64,
    paths: &RunPaths,
) -> Result<Vec<Prediction>> {
    let start = floor_to_hour(now)?;
    let mut sweep = TimestampSweep::new(start, start);
    sweep.end = start + Duration::days(1) - sweep.interval;

    generate(config, &sweep, seed, &paths.raw)?;
    let table = aggregate_file(&paths.raw, &paths.aggregated)?;

    // The raw file is append-only, so keep only the hours generated now.
    let (_, fresh) = table.split_at(start);
    forecast(
        fitted,
        &FutureFrame::from_table(&fresh),
        FillPolicy::Reject,
        &paths.forecast,
    )
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            std::fs::create_dir_all(dir)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::AdditiveRegression;
    use chrono::TimeZone;

    fn small_config() -> TelemetryConfig {
        let mut config = TelemetryConfig::default();
        config.sites.truncate(2);
        config
    }

    #[test]
    fn test_generate_then_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("data").join("raw.csv");
        let aggregated = dir.path().join("data").join("hourly.csv");
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let sweep = TimestampSweep::new(t0, t0 + Duration::minutes(170));
        let summary = generate(&small_config(), &sweep, 1, &raw).unwrap();
        assert_eq!(summary.rows, 18 * 2 * 6);

        let table = aggregate_file(&raw, &aggregated).unwrap();
        assert_eq!(table.len(), 3 * 2);
        assert_eq!(table.site_columns, vec!["site_Site_A", "site_Site_B"]);
        assert!(table.records.iter().all(|r| r.users > 0));

        let back = AggregatedTable::from_path(&aggregated).unwrap();
        assert_eq!(back.len(), table.len());
    }

    #[test]
    fn test_train_with_split_reports_accuracy() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.csv");
        let aggregated = dir.path().join("hourly.csv");
        let t0 = Utc.with_ymd_and_hms(2024, 11, 28, 0, 0, 0).unwrap();

        let sweep = TimestampSweep::new(t0, t0 + Duration::days(4) - Duration::minutes(10));
        generate(&small_config(), &sweep, 7, &raw).unwrap();
        let table = aggregate_file(&raw, &aggregated).unwrap();

        let split = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
        let outcome = train(&AdditiveRegression::default(), &table, Some(split)).unwrap();

        assert_eq!(outcome.train_rows, 3 * 24 * 2);
        assert_eq!(outcome.test_rows, 24 * 2);
        assert_eq!(outcome.test_predictions.len(), outcome.test_rows);
        let accuracy = outcome.accuracy.unwrap();
        assert!(accuracy.rmse.is_finite());
        assert!(accuracy.mae < 5.0, "{accuracy}");
    }

    #[test]
    fn test_split_outside_history_is_rejected() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let raw = RawTable::default();
        let table = aggregate(&raw).unwrap();

        let err = train(&AdditiveRegression::default(), &table, Some(t0)).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidParameter(_)));
    }

    #[test]
    fn test_run_forecasts_one_day_per_site() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RunPaths {
            raw: dir.path().join("raw.csv"),
            aggregated: dir.path().join("hourly.csv"),
            forecast: dir.path().join("forecast.csv"),
        };
        let config = small_config();

        let history_start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let history_raw = dir.path().join("history.csv");
        let history_hourly = dir.path().join("history_hourly.csv");
        let sweep = TimestampSweep::new(history_start, history_start + Duration::days(2));
        generate(&config, &sweep, 3, &history_raw).unwrap();
        let history = aggregate_file(&history_raw, &history_hourly).unwrap();
        let fitted = AdditiveRegression::default().fit(&history).unwrap();

        let now = Utc.with_ymd_and_hms(2025, 1, 3, 6, 25, 0).unwrap();
        let predictions = run(&config, &fitted, now, 11, &paths).unwrap();

        assert_eq!(predictions.len(), 24 * 2);
        assert_eq!(
            predictions[0].ds,
            Utc.with_ymd_and_hms(2025, 1, 3, 6, 0, 0).unwrap()
        );
        assert_eq!(predictions[1].site.as_deref(), Some("Site_B"));

        let written = std::fs::read_to_string(&paths.forecast).unwrap();
        assert_eq!(
            written.lines().next().unwrap(),
            "ds,site,yhat,yhat_lower,yhat_upper"
        );
        assert_eq!(written.lines().count(), 1 + 48);

        // A second pass appends raw rows but forecasts only the new day.
        let later = now + Duration::days(1);
        let second = run(&config, &fitted, later, 12, &paths).unwrap();
        assert_eq!(second.len(), 48);

        let raw = std::fs::read_to_string(&paths.raw).unwrap();
        let headers = raw.lines().filter(|l| l.starts_with("timestamp,")).count();
        assert_eq!(headers, 1);
        assert_eq!(raw.lines().count(), 1 + 2 * 24 * 6 * 2 * 6);
        assert_eq!(
            second[0].ds,
            Utc.with_ymd_and_hms(2025, 1, 4, 6, 0, 0).unwrap()
        );
    }
}
