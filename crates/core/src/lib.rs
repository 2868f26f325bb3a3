#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::AppConfig;
pub use error::{FlagError, FlagResult};
pub use value::{AttributeValue, Context, Scalar};
