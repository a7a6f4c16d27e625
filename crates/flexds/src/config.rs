//! Driver configuration.
//!
//! Values come from, in increasing priority: built-in defaults, a TOML file,
//! and `FLEXDS_*` environment variables. The kubelet runs the driver with a
//! minimal environment, so a `flexds.toml` beside the binary is usually the
//! way to configure a node.

use std::path::{Path, PathBuf};

use flexds_common::{ByteSize, FlexError, FlexResult};
use flexds_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

use crate::filesystem::FileSystem;

/// Name of the configuration file looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "flexds.toml";

/// Smallest backing file size accepted.
pub const MIN_WRITE_SPACE: ByteSize = ByteSize::mebibytes(1);

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `flexds=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Driver configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlexConfig {
    /// Filesystem the backing file is formatted with.
    pub filesystem: FileSystem,
    /// Size of the backing file, i.e. how much a pod may write.
    pub write_space: ByteSize,
    /// Logging.
    pub log: LogConfig,
    /// Object storage connection.
    pub s3: TransferConfig,
}

impl Default for FlexConfig {
    fn default() -> Self {
        Self {
            filesystem: FileSystem::Ext4,
            write_space: ByteSize::mebibytes(100),
            log: LogConfig::default(),
            s3: TransferConfig::default(),
        }
    }
}

impl FlexConfig {
    /// Load the configuration for this process.
    ///
    /// `explicit` must exist when given. Otherwise [`CONFIG_FILE_NAME`] next
    /// to the executable is read if present. Environment overrides are
    /// applied last.
    pub fn load(explicit: Option<&Path>) -> FlexResult<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())
    }

    /// Path of the configuration file next to the executable.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Read a TOML configuration file.
    pub fn from_file(path: &Path) -> FlexResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FlexError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str::<Self>(&contents)
            .map_err(|e| FlexError::config(format!("{}: {e}", path.display())))?
            .validate()
    }

    /// Parse a TOML configuration document.
    pub fn from_toml(contents: &str) -> FlexResult<Self> {
        toml::from_str::<Self>(contents)
            .map_err(|e| FlexError::config(e.to_string()))?
            .validate()
    }

    /// Apply `FLEXDS_*` overrides, reading variables through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> FlexResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(filesystem) = var("FLEXDS_FILESYSTEM") {
            self.filesystem = filesystem.parse()?;
        }
        if let Some(size) = var("FLEXDS_WRITE_SPACE") {
            self.write_space = size.parse()?;
        }
        if let Some(level) = var("FLEXDS_LOG") {
            self.log.level = level;
        }
        if let Some(endpoint) = var("FLEXDS_S3_ENDPOINT") {
            self.s3.endpoint = Some(endpoint);
        }
        if let Some(region) = var("FLEXDS_S3_REGION") {
            self.s3.region = Some(region);
        }

        self.validate()
    }

    fn validate(self) -> FlexResult<Self> {
        if self.write_space < MIN_WRITE_SPACE {
            return Err(FlexError::config(format!(
                "write_space must be at least {MIN_WRITE_SPACE}, got {}",
                self.write_space
            )));
        }
        Ok(self)
    }

    /// Set the backing filesystem.
    #[must_use]
    pub fn with_filesystem(mut self, filesystem: FileSystem) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Set the backing file size.
    #[must_use]
    pub fn with_write_space(mut self, size: ByteSize) -> Self {
        self.write_space = size;
        self
    }

    /// Set the log filter.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log.level = level.into();
        self
    }
}
