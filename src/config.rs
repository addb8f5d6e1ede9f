//! Fixer configuration
//!
//! Loaded from a TOML file, then overridden by environment variables and
//! command-line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "CHEATFIX_CONFIG";
pub const DB_PATH_ENV: &str = "CHEATFIX_DB_PATH";
const DEFAULT_CONFIG_PATH: &str = "cheatfix.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding the checkpoint tables
    #[serde(default = "default_db_path")]
    pub path: String,

    /// How long a statement waits on a locked database (ms)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String {
    "checkpoints.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory audit CSV files are written to
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

impl FixerConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the config file (explicit path, `CHEATFIX_CONFIG`, or
    /// `cheatfix.toml`), then apply `CHEATFIX_DB_PATH`.
    pub fn from_env(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match explicit {
            // An explicitly requested file must exist.
            Some(path) => Self::load(path)?,
            None => {
                let path = std::env::var(CONFIG_PATH_ENV)
                    .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
                Self::load(&path).unwrap_or_else(|e| {
                    tracing::debug!("Using default fixer config ({}): {}", path, e);
                    Self::default()
                })
            }
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            if !db_path.trim().is_empty() {
                config.database.path = db_path;
            }
        }

        Ok(config)
    }
}
