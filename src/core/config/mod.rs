//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! stackpilot has two configuration scopes:
//! - **Global**: User-level settings
//! - **Project**: `stackpilot.toml` in the working directory
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Project config file
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$STACKPILOT_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/stackpilot/config.toml`
//! 3. `~/.stackpilot/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use stackpilot::core::config::Config;
//! use std::path::Path;
//!
//! let config = Config::load(Some(Path::new("/path/to/project"))).unwrap().config;
//! println!("Assembly: {}", config.assembly().display());
//! println!("Concurrency: {}", config.concurrency());
//! ```

pub mod schema;

pub use schema::{FileConfig, WatchConfig};

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::gate::ApprovalPolicy;
use crate::engine::watch::DEFAULT_EXCLUDE;

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = "stackpilot.toml";

/// Default assembly directory.
pub const DEFAULT_ASSEMBLY_DIR: &str = "stack.out";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Files that were read, in precedence order.
    pub sources: Vec<PathBuf>,
}

/// Merged configuration from all sources.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Merged file values
    pub file: FileConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// If `project_dir` is provided, also loads `stackpilot.toml` from it.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed.
    /// Missing config files are not an error (defaults are used).
    pub fn load(project_dir: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let mut sources = Vec::new();

        let global = match Self::find_global() {
            Some(path) => {
                let config = Self::read_config(&path)?;
                sources.push(path);
                config
            }
            None => FileConfig::default(),
        };

        let project = match project_dir.map(|dir| dir.join(PROJECT_CONFIG_FILE)) {
            Some(path) if path.exists() => {
                let config = Self::read_config(&path)?;
                sources.push(path);
                config
            }
            _ => FileConfig::default(),
        };

        global.validate()?;
        project.validate()?;

        Ok(ConfigLoadResult {
            config: Config {
                file: global.merged_with(project),
            },
            sources,
        })
    }

    /// Locate the global config file, if any.
    fn find_global() -> Option<PathBuf> {
        // 1. Check $STACKPILOT_CONFIG
        if let Ok(path) = std::env::var("STACKPILOT_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check $XDG_CONFIG_HOME/stackpilot/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("stackpilot/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // 3. Check ~/.stackpilot/config.toml
        dirs::home_dir()
            .map(|home| home.join(".stackpilot/config.toml"))
            .filter(|path| path.exists())
    }

    /// Read and parse a config file.
    pub fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    // =========================================================================
    // Accessor methods with defaults
    // =========================================================================

    /// Assembly directory. Defaults to `stack.out`.
    pub fn assembly(&self) -> PathBuf {
        self.file
            .assembly
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSEMBLY_DIR))
    }

    /// Provisioning service endpoint, if configured.
    pub fn endpoint(&self) -> Option<&str> {
        self.file.endpoint.as_deref()
    }

    /// Approval policy. Defaults to `broadening`.
    pub fn require_approval(&self) -> ApprovalPolicy {
        self.file.require_approval.unwrap_or(ApprovalPolicy::Broadening)
    }

    /// Maximum concurrent stack deployments. Defaults to 1.
    pub fn concurrency(&self) -> usize {
        self.file.concurrency.unwrap_or(1)
    }

    /// Whether assets publish in parallel. Defaults to `true`.
    pub fn asset_parallelism(&self) -> bool {
        self.file.asset_parallelism.unwrap_or(true)
    }

    /// Whether all assets build before any stack deploys. Defaults to `true`.
    pub fn asset_prebuild(&self) -> bool {
        self.file.asset_prebuild.unwrap_or(true)
    }

    /// Whether deploys run with rollback enabled. Defaults to `true`.
    pub fn rollback(&self) -> bool {
        self.file.rollback.unwrap_or(true)
    }

    /// Outputs file, if configured.
    pub fn outputs_file(&self) -> Option<&Path> {
        self.file.outputs_file.as_deref()
    }

    /// Notification targets from config (`None` = not managed).
    pub fn notification_arns(&self) -> Option<&[String]> {
        self.file.notification_arns.as_deref()
    }

    /// Tags from config.
    pub fn tags(&self) -> BTreeMap<String, String> {
        self.file.tags.clone().unwrap_or_default()
    }

    /// Watch include globs. Defaults to everything.
    pub fn watch_include(&self) -> Vec<String> {
        self.file
            .watch
            .as_ref()
            .and_then(|w| w.include.clone())
            .unwrap_or_else(|| vec!["**".to_string()])
    }

    /// Watch exclude globs, always including the defaults.
    pub fn watch_exclude(&self) -> Vec<String> {
        let mut globs: Vec<String> = DEFAULT_EXCLUDE.iter().map(|g| g.to_string()).collect();
        let assembly = self.assembly();
        let assembly = assembly.to_string_lossy();
        globs.push(format!("{}/**", assembly.trim_end_matches('/')));
        if let Some(extra) = self.file.watch.as_ref().and_then(|w| w.exclude.as_ref()) {
            globs.extend(extra.iter().cloned());
        }
        globs
    }
}

/// Write a file atomically (temp file in the same directory, then rename).
///
/// Creates parent directories if needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ConfigError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::WriteError { path, source }
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_err(path))?;
        }
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut file = fs::File::create(&temp_path).map_err(write_err(&temp_path))?;
    file.write_all(contents).map_err(write_err(&temp_path))?;
    file.sync_all().map_err(write_err(&temp_path))?;

    fs::rename(&temp_path, path).map_err(write_err(path))?;
    Ok(())
}
