//! Configuration
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `cadence.toml` (or the file named by `--config` / `CADENCE_CONFIG_PATH`)
//! 3. `CADENCE_*` environment variables, `__` between sections
//!    (`CADENCE_DRIVER__MAX_INSTRUCTIONS_PER_STEP=10000`)

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "cadence.toml";
const CONFIG_PATH_VAR: &str = "CADENCE_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Instructions one `step` may execute before faulting with `FuelExhausted`.
    /// Unlimited when unset.
    #[serde(default)]
    pub max_instructions_per_step: Option<u64>,

    /// Log every executed instruction at trace level
    #[serde(default)]
    pub trace_instructions: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "cadence_core=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl Config {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    max_instructions_per_step: Option<u64>,
}

impl ConfigBuilder {
    /// Config file path (overrides default search)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Instruction budget (overrides config file and env vars)
    pub fn max_instructions_per_step(mut self, limit: Option<u64>) -> Self {
        self.max_instructions_per_step = limit;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        // An explicitly named file must exist; the default one is optional
        let (path, required) = match self
            .config_path
            .or_else(|| std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from))
        {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config: Config = config::Config::builder()
            .set_default("driver.trace_instructions", false)?
            .set_default("log.filter", default_filter())?
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix("CADENCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Some(limit) = self.max_instructions_per_step {
            config.driver.max_instructions_per_step = Some(limit);
        }
        Ok(config)
    }
}
