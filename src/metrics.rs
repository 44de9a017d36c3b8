//! Accuracy of predictions against held-out actuals.

use crate::error::{Result, TelemetryError};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastAccuracy {
    /// Mean absolute error
    pub mae: f64,
    /// Mean squared error
    pub mse: f64,
    /// Root mean squared error
    pub rmse: f64,
    pub sample_count: usize,
}

impl fmt::Display for ForecastAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE {:.4}, MSE {:.4}, RMSE {:.4} over {} rows",
            self.mae, self.mse, self.rmse, self.sample_count
        )
    }
}

pub fn forecast_accuracy(predicted: &[f64], actual: &[f64]) -> Result<ForecastAccuracy> {
    if predicted.len() != actual.len() || predicted.is_empty() {
        return Err(TelemetryError::InvalidParameter(format!(
            "predicted ({}) and actual ({}) must have the same non-zero length",
            predicted.len(),
            actual.len()
        )));
    }

    let n = predicted.len() as f64;
    let errors: Vec<f64> = predicted.iter().zip(actual).map(|(p, a)| a - p).collect();

    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let mse = errors.iter().map(|e| e.powi(2)).sum::<f64>() / n;

    Ok(ForecastAccuracy {
        mae,
        mse,
        rmse: mse.sqrt(),
        sample_count: predicted.len(),
    })
}
