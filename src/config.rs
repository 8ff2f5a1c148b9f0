//! Configuration for term-filter
//!
//! Optional settings for logging and the pty handed to the child. The CSI
//! filter itself has no knobs.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::terminal::WindowSize;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "TERM_FILTER_CONFIG";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub pty: PtyConfig,
}

/// Logging goes to a file only; the terminal carries the child's output
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive, e.g. "debug" or "term_filter=trace"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Log file path; logging is off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PtyConfig {
    /// Columns used when the real terminal size is unknown
    #[serde(default = "default_cols")]
    pub cols: u16,

    /// Rows used when the real terminal size is unknown
    #[serde(default = "default_rows")]
    pub rows: u16,

    /// Value for the child's TERM; inherited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

fn default_cols() -> u16 {
    WindowSize::default().cols
}

fn default_rows() -> u16 {
    WindowSize::default().rows
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            cols: default_cols(),
            rows: default_rows(),
            term: None,
        }
    }
}

impl PtyConfig {
    pub fn fallback_size(&self) -> WindowSize {
        WindowSize {
            cols: self.cols,
            rows: self.rows,
        }
    }
}

impl Config {
    /// Get config directory path (~/.term-filter)
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".term-filter"))
    }

    /// Get config file path, honouring `TERM_FILTER_CONFIG`
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load config from the default location, or defaults if there is none
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from `path`, or return default if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}
