//! Parameter tables for the synthetic telemetry generator.
//!
//! Stored as a plain JSON object on disk:
//! ```json
//! {
//!   "sites": ["Site_A", "Site_B"],
//!   "technologies": ["4G", "5G"],
//!   "base_users": { "4G": 50, "5G": 20 },
//!   "base_resource_block": { "4G": 200, "5G": 300 },
//!   "base_temperature": { "Site_A": 25, "Site_B": 30 },
//!   "tech_temperature_influence": { "4G": 1.2, "5G": 1.5 }
//! }
//! ```
//! A loaded [`TelemetryConfig`] is never mutated; the generator borrows it for
//! the length of a run.

use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub const BASE_USERS: &str = "base_users";
pub const BASE_RESOURCE_BLOCK: &str = "base_resource_block";
pub const BASE_TEMPERATURE: &str = "base_temperature";
pub const TECH_TEMPERATURE_INFLUENCE: &str = "tech_temperature_influence";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Sites in declared (generation) order.
    pub sites: Vec<String>,
    /// Technologies in declared (generation) order.
    pub technologies: Vec<String>,
    pub base_users: BTreeMap<String, f64>,
    pub base_resource_block: BTreeMap<String, f64>,
    pub base_temperature: BTreeMap<String, f64>,
    pub tech_temperature_influence: BTreeMap<String, f64>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let technologies = ["2G", "3G", "4G", "5G", "LTE", "WiFi"];
        let table = |values: [f64; 6]| -> BTreeMap<String, f64> {
            technologies
                .iter()
                .zip(values)
                .map(|(tech, v)| (tech.to_string(), v))
                .collect()
        };

        Self {
            sites: ["Site_A", "Site_B", "Site_C", "Site_D"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            technologies: technologies.iter().map(|t| t.to_string()).collect(),
            base_users: table([70.0, 60.0, 50.0, 20.0, 30.0, 40.0]),
            base_resource_block: table([100.0, 150.0, 200.0, 300.0, 150.0, 100.0]),
            base_temperature: [
                ("Site_A", 25.0),
                ("Site_B", 30.0),
                ("Site_C", 20.0),
                ("Site_D", 35.0),
            ]
            .iter()
            .map(|(site, t)| (site.to_string(), *t))
            .collect(),
            tech_temperature_influence: table([0.8, 1.0, 1.2, 1.5, 1.1, 1.0]),
        }
    }
}

impl TelemetryConfig {
    /// Loads the tables from a JSON file at `path` and validates them.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TelemetryConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every declared site and technology resolves in every table
    /// it is looked up in, and that all values are usable as distribution
    /// parameters.
    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() || self.technologies.is_empty() {
            return Err(TelemetryError::InvalidParameter(
                "at least one site and one technology must be declared".to_string(),
            ));
        }
        ensure_unique("site", &self.sites)?;
        ensure_unique("technology", &self.technologies)?;

        for site in &self.sites {
            usable(BASE_TEMPERATURE, site, self.base_temperature(site)?, false)?;
        }
        for tech in &self.technologies {
            usable(BASE_USERS, tech, self.base_users(tech)?, true)?;
            usable(BASE_RESOURCE_BLOCK, tech, self.base_resource_block(tech)?, true)?;
            usable(
                TECH_TEMPERATURE_INFLUENCE,
                tech,
                self.temperature_influence(tech)?,
                false,
            )?;
        }
        Ok(())
    }

    pub fn base_users(&self, technology: &str) -> Result<f64> {
        lookup(&self.base_users, BASE_USERS, technology)
    }

    pub fn base_resource_block(&self, technology: &str) -> Result<f64> {
        lookup(&self.base_resource_block, BASE_RESOURCE_BLOCK, technology)
    }

    pub fn base_temperature(&self, site: &str) -> Result<f64> {
        lookup(&self.base_temperature, BASE_TEMPERATURE, site)
    }

    pub fn temperature_influence(&self, technology: &str) -> Result<f64> {
        lookup(
            &self.tech_temperature_influence,
            TECH_TEMPERATURE_INFLUENCE,
            technology,
        )
    }
}

fn lookup(table: &BTreeMap<String, f64>, name: &'static str, key: &str) -> Result<f64> {
    table
        .get(key)
        .copied()
        .ok_or_else(|| TelemetryError::Configuration {
            table: name,
            key: key.to_string(),
        })
}

fn ensure_unique(kind: &str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(TelemetryError::InvalidParameter(format!(
                "{kind} `{name}` is declared more than once"
            )));
        }
    }
    Ok(())
}

/// Means also scale the standard deviation handed to `Normal::new`, so they
/// must be non-negative. Temperatures and influences only need to be finite.
fn usable(table: &str, key: &str, value: f64, is_mean: bool) -> Result<()> {
    if !value.is_finite() || (is_mean && value < 0.0) {
        return Err(TelemetryError::InvalidParameter(format!(
            "{table}[{key}] = {value} is not a usable value"
        )));
    }
    Ok(())
}
