use serde::Deserialize;
use std::path::Path;

/// Root application configuration. Loaded from environment variables
/// with the prefix `FLAGLINE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub results: ResultsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    /// Prepended to every key, e.g. `"staging:"`. Empty by default.
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    /// Two-sided critical value used for the confidence half-width.
    #[serde(default = "default_z_score")]
    pub z_score: f64,
}

// Default functions
fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_z_score() -> f64 {
    1.96
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            urls: default_redis_urls(),
            key_prefix: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            z_score: default_z_score(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            results: ResultsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, then environment variables.
    /// Environment values take precedence over the file.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("FLAGLINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("store.urls"),
            )
            .build()?;
        config.try_deserialize()
    }
}
