//! Error types for transfer operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while moving a dataset.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The object does not exist.
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound {
        /// Bucket that was queried.
        bucket: String,
        /// Key that was queried.
        key: String,
    },

    /// The object store rejected the request.
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    /// Packing or unpacking the dataset archive failed.
    #[error("archive error for {}: {source}", .path.display())]
    Archive {
        /// Directory being packed or unpacked.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The store could not be configured.
    #[error("invalid transfer configuration: {message}")]
    Config {
        /// The error message.
        message: String,
    },
}

impl TransferError {
    /// Create an archive error for the given directory.
    pub fn archive(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }
}
