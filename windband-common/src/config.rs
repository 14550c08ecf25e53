//! Configuration loading and root folder resolution
//!
//! Configuration comes from an optional TOML file. A missing or unreadable
//! file is never fatal: services log a warning and run on compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "WINDBAND_ROOT_FOLDER";

/// Default listen address for the conversion service
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";

/// Subdirectories created under the root folder
pub const JOBS_DIR: &str = "jobs";
pub const OUTPUTS_DIR: &str = "outputs";
pub const DOWNLOADS_DIR: &str = "downloads";
pub const SCRATCH_DIR: &str = "scratch";

/// Top-level TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding job records, outputs and downloads
    pub root_folder: Option<PathBuf>,
    /// Listen address, e.g. "127.0.0.1:5740"
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub jobs: JobsConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive ("info", "windband_convert=debug", ...)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Job lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Seconds a terminal progress entry stays readable before removal
    pub progress_retention_secs: u64,
    /// Maximum conversion duration per job; unset disables the watchdog
    pub job_timeout_secs: Option<u64>,
    /// Accepted input file extensions (lower case, no dot)
    pub allowed_extensions: Vec<String>,
    /// Largest accepted input file in bytes
    pub max_file_bytes: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            progress_retention_secs: 60,
            job_timeout_secs: None,
            allowed_extensions: ["wav", "mp3", "mid", "midi"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Settings for the bundled placeholder conversion engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulated work per stage in milliseconds
    pub stage_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { stage_delay_ms: 500 }
    }
}

/// Default configuration file path (`<config dir>/windband/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("windband").join("config.toml"))
}

/// Load and parse a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load configuration, falling back to defaults when the file is absent or broken
pub fn load_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        info!("No configuration file location available, using defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        info!("Configuration file {} not found, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}; continuing with defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write configuration atomically (temp file in the same directory, then rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Root folder resolution, priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default
pub struct RootFolderResolver {
    env_var_name: String,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self::with_env_var(ROOT_FOLDER_ENV)
    }

    pub fn with_env_var(env_var_name: &str) -> Self {
        Self {
            env_var_name: env_var_name.to_string(),
        }
    }

    pub fn resolve(&self, cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(&self.env_var_name) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &toml_config.root_folder {
            return path.clone();
        }

        default_root_folder()
    }
}

impl Default for RootFolderResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("windband"))
        .unwrap_or_else(|| PathBuf::from("./windband_data"))
}

/// Creates the root folder layout on startup
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder and its fixed subdirectories if missing
    pub fn ensure_directories_exist(&self) -> Result<()> {
        for dir in [JOBS_DIR, OUTPUTS_DIR, DOWNLOADS_DIR, SCRATCH_DIR] {
            let path = self.root_folder.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| {
                Error::Config(format!("Cannot create {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root_folder.join(JOBS_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root_folder.join(OUTPUTS_DIR)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root_folder.join(DOWNLOADS_DIR)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root_folder.join(SCRATCH_DIR)
    }
}
