#![warn(clippy::unwrap_used)]

//! Targeting: attribute conditions, rule evaluation with time windows and
//! percentage rollout, and store-backed rule/segment management.

pub mod conditions;
pub mod engine;
pub mod repository;

pub use engine::{context_bucket, evaluate_group, evaluate_rule, evaluate_rule_at, evaluate_rules};
pub use repository::TargetingService;
