//! Configuration: connection parameters and run options.
//!
//! Settings come from a TOML file (`clinizad/config.toml` under the
//! platform config directory, or an explicit `--config` path) and every
//! field can be overridden per run from the command line. A missing file
//! is not an error; defaults apply.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// PostgreSQL connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Absent means "prompt when needed"; never written back to disk by
    /// the CLI.
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "practica".to_string(),
            user: "postgres".to_string(),
            password: None,
        }
    }
}

/// Options governing one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Rows per batch transaction. Larger pages mean fewer round trips but
    /// a bigger blast radius when a page fails.
    pub page_size: usize,
    /// When the existing-keys snapshot cannot be fetched: `true` proceeds
    /// as if the table were empty (every record classifies as new),
    /// `false` aborts the run.
    pub fail_open_on_fetch: bool,
    /// Use the on-disk snapshot cache for the authorization workbook.
    pub use_cache: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            page_size: 100,
            fail_open_on_fetch: true,
            use_cache: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub migration: RunOptions,
}

impl Config {
    /// Default config file location, e.g.
    /// `~/.config/clinizad/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("clinizad").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read_file(path),
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::read_file(&default),
                _ => Ok(Config::default()),
            },
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}
