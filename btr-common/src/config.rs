//! Bootstrap configuration helpers
//!
//! Resolves the TOML bootstrap file and the default data folder. Service
//! crates own the shape of their TOML document and load it through
//! [`load_toml_config`].

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application folder name used under the platform config/data directories
pub const APP_DIR: &str = "btr";

/// Logging configuration shared by BTR binaries
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or full EnvFilter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Config file resolution, priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `<config_dir>/btr/<file_name>` if it exists
///
/// Returns `None` when nothing applies; callers fall back to built-in defaults.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        debug!(path = %path.display(), "Config path from command line");
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            debug!(path = %path, env = env_var_name, "Config path from environment");
            return Some(PathBuf::from(path));
        }
    }

    let default = dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name))?;
    if default.exists() {
        Some(default)
    } else {
        debug!(path = %default.display(), "No config file at default location");
        None
    }
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./btr_data"))
}

/// Read and parse a TOML bootstrap file
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
}
