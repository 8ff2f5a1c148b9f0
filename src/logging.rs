//! File logging
//!
//! The terminal belongs to the child, so log output never goes to stdout or
//! stderr. Logging is enabled only when a file is configured, either through
//! `TERM_FILTER_LOG_FILE` or `log.file` in the config. The filter directive
//! comes from `TERM_FILTER_LOG`, then `log.level`, then `info`.

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const LOG_FILE_ENV: &str = "TERM_FILTER_LOG_FILE";
pub const LOG_LEVEL_ENV: &str = "TERM_FILTER_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Resolved logging settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub file: PathBuf,
    pub directive: String,
}

impl LogSettings {
    /// Combine environment overrides with the config; `None` disables logging.
    pub fn resolve(config: &LogConfig) -> Option<Self> {
        Self::resolve_with(
            config,
            env::var_os(LOG_FILE_ENV).map(PathBuf::from),
            env::var(LOG_LEVEL_ENV).ok(),
        )
    }

    fn resolve_with(
        config: &LogConfig,
        env_file: Option<PathBuf>,
        env_level: Option<String>,
    ) -> Option<Self> {
        let file = env_file
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| config.file.clone())?;

        let directive = env_level
            .filter(|l| !l.trim().is_empty())
            .or_else(|| config.level.clone())
            .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());

        Some(Self { file, directive })
    }
}

/// Install the global subscriber. Returns whether logging is active.
pub fn init(config: &LogConfig) -> Result<bool> {
    let Some(settings) = LogSettings::resolve(config) else {
        return Ok(false);
    };

    if let Some(parent) = settings.file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.file)
        .with_context(|| format!("Failed to open log file {}", settings.file.display()))?;

    let filter = EnvFilter::try_new(&settings.directive)
        .with_context(|| format!("Invalid log filter '{}'", settings.directive))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))?;

    Ok(true)
}
