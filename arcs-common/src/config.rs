//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. Every key has a built-in
//! default, so a missing file (or a file that only sets a few keys) still
//! produces a usable configuration.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "ARCS_ROOT_FOLDER";

/// Environment variable overriding the TOML config file location
pub const CONFIG_FILE_ENV: &str = "ARCS_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "arcs.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub import: ImportConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Batch import tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// Run each import inside a database transaction (rolled back on failure)
    #[serde(default = "default_transactional")]
    pub transactional: bool,

    /// Interval between progress frames
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Upper bound on attempts when storage reports transient conflicts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Directory for spooled request bodies (OS temp dir when unset)
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            transactional: default_transactional(),
            progress_interval_ms: default_progress_interval_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            spool_dir: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8089
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_transactional() -> bool {
    true
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1000
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from a file
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged. A file that exists but cannot be parsed is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values the import pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.import.max_attempts == 0 {
            return Err(Error::Config("import.max_attempts must be at least 1".to_string()));
        }
        if self.import.progress_interval_ms == 0 {
            return Err(Error::Config(
                "import.progress_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.import.initial_backoff_ms > self.import.max_backoff_ms {
            return Err(Error::Config(
                "import.initial_backoff_ms must not exceed import.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Config file resolution: explicit path, then `ARCS_CONFIG`, then the
/// platform config directory (`~/.config/arcs/config.toml` on Linux)
pub fn config_file_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .map(|d| d.join("arcs").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/etc/arcs/config.toml"))
}

/// Root folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/arcs (or /var/lib/arcs for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("arcs"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/arcs"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("arcs"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/arcs"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("arcs"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\arcs"))
    } else {
        PathBuf::from("./arcs_data")
    }
}

/// Create the root folder if missing and return the database path inside it
pub fn prepare_root_folder(root_folder: &Path) -> Result<PathBuf> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        info!("Created root folder: {}", root_folder.display());
    } else if !root_folder.is_dir() {
        return Err(Error::Config(format!(
            "Root folder is not a directory: {}",
            root_folder.display()
        )));
    }

    Ok(root_folder.join(DATABASE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [import]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.import.max_attempts, 3);
        assert_eq!(config.import.progress_interval_ms, 1000);
        assert!(config.import.transactional);
        assert_eq!(config.server.port, 8089);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = TomlConfig::default();
        config.import.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = TomlConfig::default();
        config.import.initial_backoff_ms = 5000;
        config.import.max_backoff_ms = 100;
        assert!(config.validate().is_err());
    }
}
