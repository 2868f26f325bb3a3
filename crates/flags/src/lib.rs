#![warn(clippy::unwrap_used)]

//! Feature flags: typed values keyed by flag key, with partial updates.

pub mod repository;

pub use repository::FlagService;
