#![warn(clippy::unwrap_used)]

//! Free-standing metric catalogue: definitions, labelled samples and
//! count/sum/min/max/avg aggregation over a time range.

pub mod aggregate;
pub mod catalogue;

pub use aggregate::{aggregate, resolve_window};
pub use catalogue::MetricCatalogue;
