//! Forecasting over the hourly aggregated table.
//!
//! A [`ForecastModel`] is an untrained configuration; fitting it on history
//! yields a [`FittedModel`] that predicts rows of a [`FutureFrame`].

pub mod additive;
pub mod frame;

pub use additive::{AdditiveRegression, FittedAdditive};
pub use frame::{FrameRow, FutureFrame};

use crate::aggregation::AggregatedTable;
use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;
use tracing::warn;

/// What to do with an empty regressor cell at prediction time.
///
/// Columns that are absent from the frame altogether are never filled; they
/// fail with [`TelemetryError::RegressorMismatch`] regardless of policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillPolicy {
    #[default]
    Reject,
    Zero,
    TrainingMean,
}

impl fmt::Display for FillPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FillPolicy::Reject => "reject",
            FillPolicy::Zero => "zero",
            FillPolicy::TrainingMean => "training-mean",
        })
    }
}

impl FromStr for FillPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reject" => Ok(FillPolicy::Reject),
            "zero" => Ok(FillPolicy::Zero),
            "training-mean" => Ok(FillPolicy::TrainingMean),
            other => Err(format!(
                "unknown fill policy `{other}` (expected reject, zero or training-mean)"
            )),
        }
    }
}

/// Point prediction with its uncertainty interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointForecast {
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// One forecast row as written to CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub ds: DateTime<Utc>,
    pub site: Option<String>,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// A model ready to predict.
pub trait FittedModel: Debug {
    /// Regressor columns in the order `predict_row` expects them.
    fn regressors(&self) -> &[String];

    /// Fit-time means of [`Self::regressors`], used by
    /// [`FillPolicy::TrainingMean`].
    fn regressor_means(&self) -> &[f64];

    /// Last `ds` seen during fitting.
    fn history_end(&self) -> DateTime<Utc>;

    fn predict_row(&self, ds: DateTime<Utc>, regressors: &[f64]) -> Result<PointForecast>;

    /// Predicts every row of `frame`, filling empty cells per `policy`.
    fn predict(&self, frame: &FutureFrame, policy: FillPolicy) -> Result<Vec<Prediction>> {
        let regressors = self.regressors();
        let means = self.regressor_means();
        let layout = frame.align(regressors)?;

        let mut filled = vec![0usize; regressors.len()];
        let mut predictions = Vec::with_capacity(frame.len());

        for row in &frame.rows {
            let mut values = Vec::with_capacity(layout.len());
            for (k, &index) in layout.iter().enumerate() {
                let value = match row.values.get(index).copied().flatten() {
                    Some(v) => v,
                    None => {
                        filled[k] += 1;
                        match policy {
                            FillPolicy::Reject => {
                                return Err(TelemetryError::MissingRegressorValue {
                                    column: regressors[k].clone(),
                                    ds: row.ds,
                                });
                            }
                            FillPolicy::Zero => 0.0,
                            FillPolicy::TrainingMean => means.get(k).copied().unwrap_or(0.0),
                        }
                    }
                };
                values.push(value);
            }

            let point = self.predict_row(row.ds, &values)?;
            predictions.push(Prediction {
                ds: row.ds,
                site: row.site.clone(),
                yhat: point.yhat,
                yhat_lower: point.yhat_lower,
                yhat_upper: point.yhat_upper,
            });
        }

        for (column, count) in regressors.iter().zip(filled) {
            if count > 0 {
                warn!(column = %column, rows = count, policy = %policy, "Filled missing regressor values");
            }
        }

        Ok(predictions)
    }
}

/// Forecast model that can be fitted on an aggregated table.
pub trait ForecastModel: Debug {
    type Fitted: FittedModel;

    fn fit(&self, history: &AggregatedTable) -> Result<Self::Fitted>;

    fn name(&self) -> &str;
}
