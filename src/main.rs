//! CLI entry point for the site telemetry tool.
//!
//! Provides subcommands for generating synthetic per-site telemetry,
//! aggregating it hourly, training a forecasting model, forecasting, and a
//! single `run` pass chaining generation through forecasting.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use site_telemetry::aggregation::AggregatedTable;
use site_telemetry::aggregation::utility::parse_timestamp;
use site_telemetry::config::TelemetryConfig;
use site_telemetry::forecast::{AdditiveRegression, FillPolicy, FittedAdditive, FutureFrame};
use site_telemetry::output::write_records;
use site_telemetry::pipeline::{self, RunPaths};
use site_telemetry::sweep::{DEFAULT_CHUNK_SIZE, DEFAULT_INTERVAL_SECS, TimestampSweep};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "site_telemetry")]
#[command(about = "Synthetic telecom-site telemetry and temperature forecasting", long_about = None)]
struct Cli {
    /// JSON parameter tables; the built-in sample tables are used when omitted
    #[arg(short, long, global = true, env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate raw telemetry for a time range, appending to the output CSV
    Generate {
        /// First timestamp (RFC 3339 or YYYY-MM-DD[ HH:MM:SS], UTC)
        #[arg(long, value_parser = parse_instant)]
        start: DateTime<Utc>,

        /// Last timestamp, inclusive
        #[arg(long, value_parser = parse_instant)]
        end: DateTime<Utc>,

        /// Seconds between timestamps
        #[arg(short, long, default_value_t = DEFAULT_INTERVAL_SECS)]
        interval: i64,

        /// Rows buffered before each flush
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Random seed; drawn at random and logged when omitted
        #[arg(short, long)]
        seed: Option<u64>,

        #[arg(short, long, default_value = "data/synthetic_data.csv")]
        output: PathBuf,
    },
    /// Aggregate a raw CSV into hourly per-site rows
    Aggregate {
        #[arg(short, long, default_value = "data/synthetic_data.csv")]
        input: PathBuf,

        #[arg(short, long, default_value = "data/aggregated_data.csv")]
        output: PathBuf,
    },
    /// Fit the forecasting model on an aggregated CSV and save it
    Train {
        #[arg(short, long, default_value = "data/aggregated_data.csv")]
        input: PathBuf,

        #[arg(short, long, default_value = "models/forecast_model.json")]
        model: PathBuf,

        /// Hold out rows at or after this instant and report accuracy on them
        #[arg(long, value_parser = parse_instant)]
        split: Option<DateTime<Utc>>,

        /// Probability covered by the prediction interval
        #[arg(long, default_value_t = 0.8)]
        interval_width: f64,

        /// Where to write held-out predictions when --split is given
        #[arg(long)]
        test_output: Option<PathBuf>,
    },
    /// Forecast with a saved model
    Forecast {
        #[arg(short, long, default_value = "models/forecast_model.json")]
        model: PathBuf,

        /// CSV with `ds` and regressor columns; empty cells follow --fill
        #[arg(long, conflicts_with = "periods")]
        frame: Option<PathBuf>,

        /// Forecast this many hours per site after the end of --history
        #[arg(long)]
        periods: Option<usize>,

        /// Aggregated CSV the horizon is built from when --periods is given
        #[arg(long, default_value = "data/aggregated_data.csv")]
        history: PathBuf,

        /// reject, zero or training-mean
        #[arg(long, default_value_t = FillPolicy::Reject)]
        fill: FillPolicy,

        #[arg(short, long, default_value = "data/forecast.csv")]
        output: PathBuf,
    },
    /// Generate one day from now, aggregate it, and forecast it with a saved model
    Run {
        #[arg(short, long, default_value = "models/forecast_model.json")]
        model: PathBuf,

        #[arg(short, long)]
        seed: Option<u64>,

        #[arg(long, default_value = "data/synthetic_data.csv")]
        raw: PathBuf,

        #[arg(long, default_value = "data/aggregated_data.csv")]
        aggregated: PathBuf,

        #[arg(long, default_value = "data/forecasted_temperature.csv")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/site_telemetry.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("site_telemetry.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            start,
            end,
            interval,
            chunk_size,
            seed,
            output,
        } => {
            let seed = resolve_seed(seed);
            let sweep = TimestampSweep::new(start, end)
                .with_interval(Duration::seconds(interval))
                .with_chunk_size(chunk_size);

            let summary = pipeline::generate(&config, &sweep, seed, &output)
                .with_context(|| format!("generating into {}", output.display()))?;
            info!(rows = summary.rows, output = %output.display(), "Generate finished");
        }
        Commands::Aggregate { input, output } => {
            pipeline::aggregate_file(&input, &output)
                .with_context(|| format!("aggregating {}", input.display()))?;
        }
        Commands::Train {
            input,
            model,
            split,
            interval_width,
            test_output,
        } => {
            let table = AggregatedTable::from_path(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let regression = AdditiveRegression::default().with_interval_width(interval_width);

            let outcome = pipeline::train(&regression, &table, split)?;
            if let Some(parent) = model.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            outcome
                .fitted
                .save(&model)
                .with_context(|| format!("saving model to {}", model.display()))?;

            if let Some(accuracy) = outcome.accuracy {
                info!(%accuracy, "Model evaluation");
            }
            if let Some(path) = test_output {
                write_records(&path, &outcome.test_predictions)?;
            }
            info!(
                train_rows = outcome.train_rows,
                model = %model.display(),
                "Model trained and saved"
            );
        }
        Commands::Forecast {
            model,
            frame,
            periods,
            history,
            fill,
            output,
        } => {
            let fitted = FittedAdditive::load(&model)
                .with_context(|| format!("loading model {}", model.display()))?;

            let frame = match (frame, periods) {
                (Some(path), _) => FutureFrame::from_path(&path)
                    .with_context(|| format!("reading frame {}", path.display()))?,
                (None, Some(periods)) => {
                    let table = AggregatedTable::from_path(&history)
                        .with_context(|| format!("reading {}", history.display()))?;
                    FutureFrame::hourly_per_site(&table, periods)?
                }
                (None, None) => anyhow::bail!("either --frame or --periods is required"),
            };

            pipeline::forecast(&fitted, &frame, fill, &output)?;
        }
        Commands::Run {
            model,
            seed,
            raw,
            aggregated,
            output,
        } => {
            let fitted = FittedAdditive::load(&model)
                .with_context(|| format!("loading model {}", model.display()))?;
            let paths = RunPaths {
                raw,
                aggregated,
                forecast: output,
            };

            let predictions = pipeline::run(&config, &fitted, Utc::now(), resolve_seed(seed), &paths)?;
            info!(rows = predictions.len(), output = %paths.forecast.display(), "Run finished");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TelemetryConfig> {
    match path {
        Some(path) => {
            let config = TelemetryConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            info!(path = %path.display(), sites = config.sites.len(), "Loaded parameter tables");
            Ok(config)
        }
        None => Ok(TelemetryConfig::default()),
    }
}

fn resolve_seed(seed: Option<u64>) -> u64 {
    let seed = seed.unwrap_or_else(rand::random);
    info!(seed, "Using random seed");
    seed
}

fn parse_instant(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp(value).ok_or_else(|| format!("`{value}` is not a timestamp"))
}
