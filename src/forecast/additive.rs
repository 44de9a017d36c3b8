//! Additive regression: intercept, linear trend, daily and weekly Fourier
//! seasonality, and standardized exogenous regressors, fitted by ridge least
//! squares.

use crate::aggregation::AggregatedTable;
use crate::aggregation::utility::{mean, stddev};
use crate::error::{Result, TelemetryError};
use crate::forecast::{FittedModel, ForecastModel, PointForecast};
use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAILY_PERIOD_DAYS: f64 = 1.0;
const WEEKLY_PERIOD_DAYS: f64 = 7.0;

pub const DEFAULT_DAILY_ORDER: usize = 4;
pub const DEFAULT_WEEKLY_ORDER: usize = 3;
pub const DEFAULT_RIDGE: f64 = 1e-3;
pub const DEFAULT_INTERVAL_WIDTH: f64 = 0.80;

#[derive(Debug, Clone, PartialEq)]
pub struct AdditiveRegression {
    /// Fourier pairs for the 24 h cycle.
    pub daily_order: usize,
    /// Fourier pairs for the 7 day cycle.
    pub weekly_order: usize,
    /// L2 penalty on every coefficient except the intercept.
    pub ridge: f64,
    /// Probability mass covered by `yhat_lower..yhat_upper`.
    pub interval_width: f64,
}

impl Default for AdditiveRegression {
    fn default() -> Self {
        Self {
            daily_order: DEFAULT_DAILY_ORDER,
            weekly_order: DEFAULT_WEEKLY_ORDER,
            ridge: DEFAULT_RIDGE,
            interval_width: DEFAULT_INTERVAL_WIDTH,
        }
    }
}

impl AdditiveRegression {
    pub fn with_interval_width(mut self, width: f64) -> Self {
        self.interval_width = width;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(TelemetryError::InvalidParameter(format!(
                "interval width must be in (0, 1), got {}",
                self.interval_width
            )));
        }
        if !self.ridge.is_finite() || self.ridge < 0.0 {
            return Err(TelemetryError::InvalidParameter(format!(
                "ridge penalty must be finite and non-negative, got {}",
                self.ridge
            )));
        }
        Ok(())
    }
}

impl ForecastModel for AdditiveRegression {
    type Fitted = FittedAdditive;

    #[tracing::instrument(name = "fit_additive", skip_all, fields(rows = history.len()))]
    fn fit(&self, history: &AggregatedTable) -> Result<FittedAdditive> {
        self.validate()?;
        history.check_widths()?;

        let start = history.records.iter().map(|r| r.ds).min();
        let end = history.history_end();
        let (Some(history_start), Some(history_end)) = (start, end) else {
            return Err(TelemetryError::Model(
                "cannot fit on an empty history".to_string(),
            ));
        };

        let regressors = history.regressor_columns();
        let raw: Vec<Vec<f64>> = history
            .records
            .iter()
            .map(|r| history.regressor_values(r))
            .collect();

        let mut regressor_means = Vec::with_capacity(regressors.len());
        let mut regressor_scales = Vec::with_capacity(regressors.len());
        for k in 0..regressors.len() {
            let column: Vec<f64> = raw.iter().map(|row| row[k]).collect();
            let m = mean(&column);
            let s = stddev(&column, m);
            regressor_means.push(m);
            regressor_scales.push(if s > 0.0 { s } else { 1.0 });
        }

        let span_days = (history_end - history_start).num_seconds() as f64 / SECONDS_PER_DAY;
        let mut fitted = FittedAdditive {
            model: "additive_regression".to_string(),
            regressors,
            regressor_means,
            regressor_scales,
            coefficients: Vec::new(),
            history_start,
            history_end,
            trend_scale_days: if span_days > 0.0 { span_days } else { 1.0 },
            daily_order: self.daily_order,
            weekly_order: self.weekly_order,
            residual_std: 0.0,
            interval_z: standard_normal_quantile(0.5 + self.interval_width / 2.0)?,
            interval_width: self.interval_width,
        };

        let n = history.len();
        let p = fitted.feature_count();
        let mut design = DMatrix::<f64>::zeros(n, p);
        for (i, (record, values)) in history.records.iter().zip(&raw).enumerate() {
            for (j, x) in fitted.features(record.ds, values).into_iter().enumerate() {
                design[(i, j)] = x;
            }
        }
        let target = DVector::from_iterator(n, history.records.iter().map(|r| r.y));

        let mut gram = design.transpose() * &design;
        for j in 1..p {
            gram[(j, j)] += self.ridge * n as f64;
        }
        let rhs = design.transpose() * &target;

        let solution = gram
            .cholesky()
            .ok_or_else(|| {
                TelemetryError::Model(
                    "normal equations are not positive definite; increase the ridge penalty"
                        .to_string(),
                )
            })?
            .solve(&rhs);
        fitted.coefficients = solution.iter().copied().collect();

        let residuals = &target - &design * &solution;
        fitted.residual_std = (residuals.norm_squared() / n as f64).sqrt();

        info!(
            rows = n,
            features = p,
            residual_std = fitted.residual_std,
            "Fitted additive regression"
        );
        Ok(fitted)
    }

    fn name(&self) -> &str {
        "additive_regression"
    }
}

/// Coefficients and scaling of a fitted [`AdditiveRegression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedAdditive {
    pub model: String,
    pub regressors: Vec<String>,
    pub regressor_means: Vec<f64>,
    pub regressor_scales: Vec<f64>,
    /// Intercept, trend, daily sin/cos pairs, weekly sin/cos pairs, then one
    /// per regressor.
    pub coefficients: Vec<f64>,
    pub history_start: DateTime<Utc>,
    pub history_end: DateTime<Utc>,
    pub trend_scale_days: f64,
    pub daily_order: usize,
    pub weekly_order: usize,
    pub residual_std: f64,
    pub interval_z: f64,
    pub interval_width: f64,
}

impl FittedAdditive {
    fn feature_count(&self) -> usize {
        2 + 2 * (self.daily_order + self.weekly_order) + self.regressors.len()
    }

    fn features(&self, ds: DateTime<Utc>, regressors: &[f64]) -> Vec<f64> {
        let since_start = (ds - self.history_start).num_seconds() as f64 / SECONDS_PER_DAY;
        let epoch_days = ds.timestamp() as f64 / SECONDS_PER_DAY;

        let mut x = Vec::with_capacity(self.feature_count());
        x.push(1.0);
        x.push(since_start / self.trend_scale_days);
        fourier(&mut x, epoch_days, DAILY_PERIOD_DAYS, self.daily_order);
        fourier(&mut x, epoch_days, WEEKLY_PERIOD_DAYS, self.weekly_order);
        for ((value, m), s) in regressors
            .iter()
            .zip(&self.regressor_means)
            .zip(&self.regressor_scales)
        {
            x.push((value - m) / s);
        }
        x
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        debug!(path = %path.display(), "Saved model");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fitted: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        if fitted.coefficients.len() != fitted.feature_count()
            || fitted.regressor_means.len() != fitted.regressors.len()
            || fitted.regressor_scales.len() != fitted.regressors.len()
        {
            return Err(TelemetryError::Model(format!(
                "model file {} is inconsistent: {} coefficients for {} features",
                path.display(),
                fitted.coefficients.len(),
                fitted.feature_count()
            )));
        }
        debug!(path = %path.display(), regressors = fitted.regressors.len(), "Loaded model");
        Ok(fitted)
    }
}

impl FittedModel for FittedAdditive {
    fn regressors(&self) -> &[String] {
        &self.regressors
    }

    fn regressor_means(&self) -> &[f64] {
        &self.regressor_means
    }

    fn history_end(&self) -> DateTime<Utc> {
        self.history_end
    }

    fn predict_row(&self, ds: DateTime<Utc>, regressors: &[f64]) -> Result<PointForecast> {
        if regressors.len() != self.regressors.len() {
            return Err(TelemetryError::InvalidParameter(format!(
                "expected {} regressor values, got {}",
                self.regressors.len(),
                regressors.len()
            )));
        }

        let yhat: f64 = self
            .features(ds, regressors)
            .iter()
            .zip(&self.coefficients)
            .map(|(x, b)| x * b)
            .sum();
        let margin = self.interval_z * self.residual_std;

        Ok(PointForecast {
            yhat,
            yhat_lower: yhat - margin,
            yhat_upper: yhat + margin,
        })
    }
}

fn fourier(x: &mut Vec<f64>, days: f64, period: f64, order: usize) {
    for k in 1..=order {
        let angle = 2.0 * PI * k as f64 * days / period;
        x.push(angle.sin());
        x.push(angle.cos());
    }
}

fn standard_normal_quantile(p: f64) -> Result<f64> {
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| TelemetryError::Model(format!("standard normal: {e}")))?;
    Ok(normal.inverse_cdf(p))
}
