//! Service configuration
//!
//! Command-line arguments (with environment fallbacks) are layered over the
//! TOML file; anything neither sets comes from compiled defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use windband_common::config::{
    default_config_path, RootFolderResolver, TomlConfig, DEFAULT_BIND_ADDRESS,
};

/// Command-line arguments for windband-convert
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "windband-convert")]
#[command(about = "Converts uploaded recordings into wind band parts")]
#[command(version)]
pub struct Cli {
    /// Root folder for job records, outputs and downloads
    /// (falls back to WINDBAND_ROOT_FOLDER, then the config file)
    #[arg(short, long)]
    pub root_folder: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, env = "WINDBAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5740
    #[arg(short, long, env = "WINDBAND_BIND")]
    pub bind: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "WINDBAND_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    pub write_config: bool,
}

impl Cli {
    /// `--config`, else the per-user default location
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(default_config_path)
    }
}

/// Upload intake rules applied to `POST /jobs`
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeLimits {
    /// Lower-case extensions without the dot
    pub allowed_extensions: Vec<String>,
    pub max_file_bytes: u64,
}

impl IntakeLimits {
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}

impl Default for IntakeLimits {
    fn default() -> Self {
        let jobs = windband_common::config::JobsConfig::default();
        Self {
            allowed_extensions: jobs.allowed_extensions,
            max_file_bytes: jobs.max_file_bytes,
        }
    }
}

/// Fully resolved settings for one service process
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub root_folder: PathBuf,
    pub bind_address: String,
    pub log_level: String,
    /// How long a finished job's progress entry stays readable
    pub progress_retention: Duration,
    /// Watchdog limit per conversion; `None` disables it
    pub job_timeout: Option<Duration>,
    /// Simulated work per placeholder engine stage
    pub stage_delay: Duration,
    pub intake: IntakeLimits,
}

impl ServiceConfig {
    /// Merge CLI arguments over the TOML configuration
    pub fn from_sources(cli: &Cli, toml: &TomlConfig) -> Self {
        let root_folder = RootFolderResolver::new().resolve(cli.root_folder.as_deref(), toml);

        let bind_address = cli
            .bind
            .clone()
            .or_else(|| toml.bind_address.clone())
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let log_level = cli
            .log_level
            .clone()
            .unwrap_or_else(|| toml.logging.level.clone());

        Self {
            root_folder,
            bind_address,
            log_level,
            progress_retention: Duration::from_secs(toml.jobs.progress_retention_secs),
            job_timeout: toml.jobs.job_timeout_secs.map(Duration::from_secs),
            stage_delay: windband_common::time::millis_to_duration(toml.engine.stage_delay_ms),
            intake: IntakeLimits {
                allowed_extensions: toml
                    .jobs
                    .allowed_extensions
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                    .collect(),
                max_file_bytes: toml.jobs.max_file_bytes,
            },
        }
    }

    /// The TOML equivalent of these settings
    pub fn to_toml(&self) -> TomlConfig {
        let mut toml = TomlConfig {
            root_folder: Some(self.root_folder.clone()),
            bind_address: Some(self.bind_address.clone()),
            ..TomlConfig::default()
        };
        toml.logging.level = self.log_level.clone();
        toml.jobs.progress_retention_secs = self.progress_retention.as_secs();
        toml.jobs.job_timeout_secs = self.job_timeout.map(|t| t.as_secs());
        toml.jobs.allowed_extensions = self.intake.allowed_extensions.clone();
        toml.jobs.max_file_bytes = self.intake.max_file_bytes;
        toml.engine.stage_delay_ms = self.stage_delay.as_millis() as u64;
        toml
    }
}
