//! Filesystem operations for dataset volumes.
//!
//! This module handles:
//! - The backing file holding the pod's writable layer
//! - Loop mounting that file
//! - Composing the overlay at the pod-visible path

pub mod backing;
pub mod mounts;
pub mod overlay;

use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

pub use mounts::{DeviceOps, FileSystem, SystemDevice};
pub use overlay::OverlayLayout;

/// Mode of every directory the driver creates.
pub const DIR_MODE: u32 = 0o755;

/// Create `path` (and missing parents) with [`DIR_MODE`].
///
/// Returns whether the final directory was created by this call.
pub(crate) fn create_dir(path: &Path) -> std::io::Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    match std::fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
    {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, succeeding if it is already gone.
pub(crate) fn remove_dir_all_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a file, succeeding if it is already gone.
pub(crate) fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
