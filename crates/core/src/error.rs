use thiserror::Error;

pub type FlagResult<T> = Result<T, FlagError>;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("Configuration loading error: {0}")]
    Config(String),

    /// An experiment definition that cannot be bucketed (no variants, unusable weights).
    #[error("Experiment configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A create call named a record that already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing key/value store failed. Never retried here.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for FlagError {
    fn from(err: config::ConfigError) -> Self {
        FlagError::Config(err.to_string())
    }
}
