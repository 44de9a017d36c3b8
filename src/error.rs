//! Error types shared by the generation, aggregation and forecasting steps.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Every failure the library surfaces to its caller.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A site or technology has no entry in one of the parameter tables.
    #[error("configuration error: no entry for `{key}` in {table}")]
    Configuration { table: &'static str, key: String },

    /// A parameter is out of range (negative base, zero interval, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A table is missing a column or holds a non-numeric value in a numeric column.
    #[error("schema error: {0}")]
    Schema(String),

    /// The prediction input does not carry the regressor columns seen at fit time.
    #[error("regressor mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    RegressorMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// An empty regressor cell under [`FillPolicy::Reject`](crate::forecast::FillPolicy::Reject).
    #[error("missing value for regressor `{column}` at {ds}")]
    MissingRegressorValue { column: String, ds: DateTime<Utc> },

    /// Fitting or evaluating a forecast model failed.
    #[error("model error: {0}")]
    Model(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
