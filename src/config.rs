//! Configuration loader and validator for the catalog synchroniser.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::remote::RemoteConfig;
use crate::sync::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
    pub importer: Importer,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub artifact_dir: String,
    #[serde(default = "default_debounce_ms")]
    pub sync_debounce_ms: u64,
}

/// Remote marketplace API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: Retry,
}

/// Retry settings for page fetches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Which local catalog importer receives the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Importer {
    Sqlite {
        database_url: String,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Ensure required directories exist (creates `app.artifact_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.artifact_dir)
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            base_url: self.remote.base_url.clone(),
            api_key: self.remote.api_key.clone(),
            timeout: Duration::from_secs(self.remote.timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.remote.retry.max_attempts,
            base_delay: Duration::from_millis(self.remote.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.remote.retry.max_delay_ms),
        }
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.app.sync_debounce_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.artifact_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.artifact_dir must be non-empty"));
    }

    let base = cfg.remote.base_url.trim();
    if base.is_empty() {
        return Err(ConfigError::Invalid("remote.base_url must be non-empty"));
    }
    if reqwest::Url::parse(base).is_err() {
        return Err(ConfigError::Invalid("remote.base_url must be an absolute URL"));
    }
    if cfg.remote.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.api_key must be non-empty"));
    }
    if cfg.remote.timeout_secs == 0 {
        return Err(ConfigError::Invalid("remote.timeout_secs must be > 0"));
    }
    if cfg.remote.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid("remote.retry.max_attempts must be >= 1"));
    }
    if cfg.remote.retry.max_delay_ms < cfg.remote.retry.base_delay_ms {
        return Err(ConfigError::Invalid(
            "remote.retry.max_delay_ms must be >= remote.retry.base_delay_ms",
        ));
    }

    match &cfg.importer {
        Importer::Sqlite { database_url } => {
            if database_url.trim().is_empty() {
                return Err(ConfigError::Invalid("importer.database_url must be non-empty"));
            }
        }
        Importer::Command { program, .. } => {
            if program.trim().is_empty() {
                return Err(ConfigError::Invalid("importer.program must be non-empty"));
            }
        }
    }

    Ok(())
}

/// Returns a sample configuration.
pub fn example() -> &'static str {
    r#"app:
  artifact_dir: "./data/artifacts"
  sync_debounce_ms: 2000

remote:
  base_url: "https://marketplace.example.com/api/"
  api_key: "YOUR_MARKETPLACE_API_KEY"
  timeout_secs: 30
  retry:
    max_attempts: 3
    base_delay_ms: 500
    max_delay_ms: 10000

importer:
  kind: sqlite
  database_url: "sqlite://./data/catalog.db"
"#
}
