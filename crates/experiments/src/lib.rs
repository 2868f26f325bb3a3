#![warn(clippy::unwrap_used)]

//! Experiments: deterministic weighted bucketing, sticky assignment gated by
//! targeting rules, metric recording and per-variant results.

pub mod assignment;
pub mod bucketing;
pub mod engine;
pub mod keys;
pub mod repository;
pub mod results;

pub use bucketing::{bucket_point, bucket_variant};
pub use engine::ExperimentEngine;
pub use repository::ExperimentRepository;
pub use results::{MetricAccumulator, TimeWindow};
