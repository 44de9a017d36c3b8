use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw CSV header, in serialization order.
pub const RAW_COLUMNS: [&str; 6] = [
    "timestamp",
    "site",
    "technology",
    "users",
    "resource_block_load",
    "temperature",
];

/// One row of raw telemetry for a (timestamp, site, technology) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub site: String,
    pub technology: String,
    pub users: u64,
    pub resource_block_load: u64,
    pub temperature: f64,
}
