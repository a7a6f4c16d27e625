//! CLI command definitions and the kubelet result contract.
//!
//! The kubelet reads exactly one JSON object from stdout; logs never go
//! there.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flexds_common::{FlexError, FlexResult};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};

use crate::dataset::MountOptions;
use crate::driver::{Capabilities, VolumeDriver};

/// flexds - dataset-backed ephemeral volumes for Kubernetes pods
#[derive(Parser, Debug)]
#[command(name = "flexds")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "FLEXDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The driver operation to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// FlexVolume driver operations.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the driver
    Init,

    /// Provision a volume at a pod mount point
    Mount {
        /// Pod-visible mount point
        path: Option<PathBuf>,

        /// JSON options passed by the kubelet
        #[arg(allow_hyphen_values = true)]
        options: Option<String>,
    },

    /// Upload the output and tear down a volume
    Unmount {
        /// Pod-visible mount point
        path: Option<PathBuf>,
    },

    /// Any other FlexVolume operation
    #[command(external_subcommand)]
    Other(Vec<String>),
}

impl Commands {
    /// Name of the operation, as given on the command line.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Mount { .. } => "mount",
            Self::Unmount { .. } => "unmount",
            Self::Other(args) => args.first().map_or("", String::as_str),
        }
    }

    /// Execute the operation against `driver`.
    pub async fn execute(self, driver: &dyn VolumeDriver) -> DriverOutput {
        let operation = self.operation().to_string();
        tracing::debug!(%operation, "Executing operation");

        match self {
            Self::Init => match driver.init() {
                Ok(capabilities) => {
                    DriverOutput::success("Initialization successful", capabilities)
                }
                Err(err) => DriverOutput::failure(&operation, &err),
            },

            Self::Mount { path, options } => {
                let mounted = async {
                    let path = path.ok_or_else(|| {
                        FlexError::validation("mount requires a mount path")
                    })?;
                    let options = options
                        .ok_or_else(|| FlexError::validation("mount requires options"))?;
                    let options = MountOptions::from_json(&options)?;
                    driver.mount(&path, &options).await
                }
                .await;
                DriverOutput::from_result(&operation, mounted, "Mount successful")
            }

            Self::Unmount { path } => {
                let unmounted = async {
                    let path = path
                        .ok_or_else(|| FlexError::validation("unmount requires a mount path"))?;
                    driver.unmount(&path).await
                }
                .await;
                DriverOutput::from_result(&operation, unmounted, "Unmount successful")
            }

            Self::Other(_) => {
                tracing::debug!(%operation, "Operation not supported");
                DriverOutput::not_supported(&operation)
            }
        }
    }
}

/// Outcome of an operation, as understood by the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// The operation succeeded.
    Success,
    /// The operation failed.
    Failure,
    /// The driver does not implement the operation.
    #[serde(rename = "Not supported")]
    NotSupported,
}

/// The JSON object printed on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverOutput {
    /// Outcome.
    pub status: Status,
    /// Human readable detail; the full error chain on failure.
    pub message: String,
    /// Driver capabilities.
    pub capabilities: Capabilities,
}

impl DriverOutput {
    /// A successful result.
    pub fn success(message: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            capabilities,
        }
    }

    /// A failed result carrying the error's message.
    #[must_use]
    pub fn failure(operation: &str, err: &FlexError) -> Self {
        let code = err.code().map(|code| code.to_string()).unwrap_or_default();
        tracing::error!(%operation, %code, error = %err, "Operation failed");

        Self {
            status: Status::Failure,
            message: err.to_string(),
            capabilities: Capabilities::default(),
        }
    }

    /// Result for an operation the driver does not implement.
    #[must_use]
    pub fn not_supported(operation: &str) -> Self {
        Self {
            status: Status::NotSupported,
            message: format!("operation '{operation}' is unsupported"),
            capabilities: Capabilities::default(),
        }
    }

    /// Map an operation result.
    #[must_use]
    pub fn from_result(operation: &str, result: FlexResult<()>, message: &str) -> Self {
        match result {
            Ok(()) => Self::success(message, Capabilities::default()),
            Err(err) => Self::failure(operation, &err),
        }
    }

    /// Write the result as a single JSON line.
    pub fn write_to(&self, mut out: impl Write) -> std::io::Result<()> {
        serde_json::to_writer(&mut out, self)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}
