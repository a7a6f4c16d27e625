//! Common error types for flexds.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::phase::Phase;

/// Result type alias using [`FlexError`].
pub type FlexResult<T> = Result<T, FlexError>;

/// Errors produced while provisioning or tearing down a volume.
///
/// The `Display` output of an error is what ends up in the `message` field of
/// the driver result, so wrapping variants render the full chain.
#[derive(Error, Diagnostic, Debug)]
pub enum FlexError {
    /// Malformed input, detected before any side effect.
    #[error("{message}")]
    #[diagnostic(code(flexds::validation))]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    #[diagnostic(code(flexds::io))]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Formatting the backing file failed.
    #[error("failed to execute mkfs command: {message}")]
    #[diagnostic(
        code(flexds::format),
        help("Check that mkfs for the configured filesystem is installed on the node")
    )]
    Format {
        /// Diagnostic output captured from mkfs.
        message: String,
    },

    /// A mount or unmount failed.
    #[error("{context}: {message}")]
    #[diagnostic(
        code(flexds::mount),
        help("Mounting requires root privileges and loop/overlay kernel support")
    )]
    Mount {
        /// What was being attempted.
        context: String,
        /// Diagnostic output of the mount utility or syscall.
        message: String,
    },

    /// Downloading or uploading a dataset failed.
    #[error("{context}: {source}")]
    #[diagnostic(code(flexds::transfer))]
    Transfer {
        /// What was being attempted.
        context: String,
        /// The transfer client's error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The volume options file exists but could not be decoded.
    #[error("failed to decode {}: {message}", .path.display())]
    #[diagnostic(code(flexds::options::decode))]
    Decode {
        /// Path of the options file.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// The volume options file does not exist.
    #[error("volume options not found: {}", .path.display())]
    #[diagnostic(code(flexds::options::not_found))]
    NotFound {
        /// Path of the missing options file.
        path: PathBuf,
    },

    /// A path was kept because a mount that depends on it is still up.
    #[error("{} is still in use", .path.display())]
    #[diagnostic(
        code(flexds::in_use),
        help("Retry the unmount once the mounts on top of it are gone")
    )]
    InUse {
        /// The path that was not deleted.
        path: PathBuf,
    },

    /// An error raised while executing a pipeline phase.
    #[error("{}: {source}", .phase.failure_message())]
    #[diagnostic(code(flexds::phase))]
    Phase {
        /// The phase that failed.
        phase: Phase,
        /// What went wrong.
        source: Box<FlexError>,
    },

    /// A mount failed and the completed steps were rolled back.
    #[error("{source}")]
    #[diagnostic(code(flexds::rolled_back))]
    RolledBack {
        /// The error of the step that failed.
        source: Box<FlexError>,
        /// Rollback phases that ran, in execution order.
        undone: Vec<Phase>,
    },

    /// Several unmount steps failed.
    #[error("{} unmount steps failed: {}", .errors.len(), join_errors(.errors))]
    #[diagnostic(code(flexds::teardown))]
    Teardown {
        /// Every collected failure, in step order.
        #[related]
        errors: Vec<FlexError>,
    },

    /// Invalid configuration file or environment value.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(flexds::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(code(flexds::unsupported), help("flexds requires Linux"))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },
}

impl FlexError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap a transfer client error with what was being attempted.
    pub fn transfer(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transfer {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error, or the error it wraps, is a missing options file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Phase { source, .. } | Self::RolledBack { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The phase an error was raised in, if it was wrapped with one.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            Self::RolledBack { source, .. } => source.phase(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FlexError {
    fn from(err: std::io::Error) -> Self {
        Self::io("I/O error", err)
    }
}

fn join_errors(errors: &[FlexError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
