pub mod aggregate;
pub mod types;
pub mod utility;

pub use aggregate::aggregate;
pub use types::{AggregatedRecord, AggregatedTable, RawRecord, RawTable};
