// Configuration management with layered configuration (defaults, files, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_ENV: &str = "development";

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub remote_log: RemoteLogConfig,
    pub remote_stores: HashMap<String, RemoteStoreConfig>,
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Local log path template, e.g. `/var/log/jobrun/%{std}.log`
    pub log_path: Option<String>,
    /// Directory prefix; expands to `<dir>/%{std}.log`
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            log_path: None,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLogConfig {
    /// 0 disables the timeout
    pub upload_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Settings {
    /// Load configuration with layered precedence:
    /// defaults → `config/default.toml` → `config/<env>.toml` → `JOBRUN__*` env
    pub fn load<P: AsRef<Path>>(home: P, environment: &str) -> Result<Self, ConfigError> {
        let config_dir = home.as_ref().join("config");

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", environment))).required(false))
            .add_source(
                Environment::with_prefix("JOBRUN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        for (name, store) in &self.remote_stores {
            if store.endpoint.is_empty() {
                return Err(format!("Remote store '{}': endpoint cannot be empty", name));
            }
            if store.bucket.is_empty() {
                return Err(format!("Remote store '{}': bucket cannot be empty", name));
            }
        }

        if self.logging.level.is_empty() {
            return Err("Logging level cannot be empty".to_string());
        }

        Ok(())
    }
}
