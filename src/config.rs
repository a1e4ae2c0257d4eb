//! Pipeline configuration.
//!
//! Layered with `figment`, lowest to highest priority:
//! 1. built-in defaults
//! 2. a TOML file, when one is given and exists
//! 3. environment variables prefixed with `ETL_`; `__` separates nested keys
//!    (`ETL_LOAD__MAX_RETRIES=5`, `ETL_LOGGING__JSON=true`)

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound for the extract stage.
    pub extract_timeout_ms: Option<u64>,
    /// Upper bound for the load stage, retries included.
    pub load_timeout_ms: Option<u64>,
    /// Uploads larger than this fail before detection.
    pub max_upload_bytes: Option<usize>,
    pub load: LoadConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract_timeout_ms: Some(30_000),
            load_timeout_ms: Some(30_000),
            max_upload_bytes: None,
            load: LoadConfig::default(),
            batch: BatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub max_retries: u32,
    /// First retry delay; doubled per further retry.
    pub backoff_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads; `None` uses the available parallelism.
    pub num_threads: Option<usize>,
    /// Runs allowed in flight at once; `None` means one per worker.
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `dynamic_etl=debug`.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Load the configuration: defaults, then `file` (if it exists), then `ETL_*` env vars.
pub fn load_config(file: Option<&Path>) -> Result<PipelineConfig, Box<figment::Error>> {
    layered(file).extract().map_err(Box::new)
}

fn layered(file: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));
    if let Some(path) = file {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }
    figment.merge(Env::prefixed("ETL_").split("__"))
}
