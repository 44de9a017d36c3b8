pub mod aggregation;
pub mod config;
pub mod error;
pub mod forecast;
pub mod generator;
pub mod metrics;
pub mod observation;
pub mod output;
pub mod pipeline;
pub mod sweep;

pub use error::{Result, TelemetryError};
