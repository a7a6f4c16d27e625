//! Backing store: a fixed-size file holding the pod's writable filesystem.
//!
//! The file bounds how much a pod can write without partitioning the host
//! disk, and everything it holds goes away with a single delete.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use flexds_common::{ByteSize, FlexError, FlexResult};

use super::mounts::{DeviceOps, FileSystem};
use super::{create_dir, remove_dir_all_if_exists, remove_file_if_exists};

/// Create a sparse file of exactly `size` at `path` and format it.
///
/// A file left behind by a failed format is removed again.
pub fn create_backing_file(
    device: &dyn DeviceOps,
    path: &Path,
    filesystem: FileSystem,
    size: ByteSize,
) -> FlexResult<()> {
    tracing::debug!(path = %path.display(), %filesystem, %size, "Creating backing file");

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| FlexError::io("failed to create file system file", e))?;

    let formatted = file
        .set_len(size.as_bytes())
        .map_err(|e| FlexError::io("failed to allocate file system size", e))
        .and_then(|()| {
            drop(file);
            device.format(path, filesystem)
        });

    if let Err(err) = formatted {
        if let Err(cleanup) = remove_file_if_exists(path) {
            tracing::warn!(
                path = %path.display(),
                error = %cleanup,
                "Failed to remove unformatted backing file"
            );
        }
        return Err(err);
    }

    tracing::info!(path = %path.display(), %size, "Backing file created");
    Ok(())
}

/// Delete the backing file. An absent file counts as deleted.
pub fn destroy_backing_file(path: &Path) -> FlexResult<()> {
    remove_file_if_exists(path).map_err(|e| FlexError::io("failed to delete fs-in-file file", e))?;
    tracing::debug!(path = %path.display(), "Backing file deleted");
    Ok(())
}

/// Mount the backing file at `mount_path`, creating the mount point.
///
/// An existing mount point directory is reused; one created by this call
/// is removed again if the mount fails.
pub fn mount_loopback(device: &dyn DeviceOps, file: &Path, mount_path: &Path) -> FlexResult<()> {
    let created = create_dir(mount_path)
        .map_err(|e| FlexError::io("failed to create mount directory", e))?;

    if let Err(err) = device.mount_loopback(file, mount_path) {
        if created {
            if let Err(cleanup) = remove_dir_all_if_exists(mount_path) {
                tracing::warn!(
                    path = %mount_path.display(),
                    error = %cleanup,
                    "Failed to remove mount directory"
                );
            }
        }
        return Err(err);
    }

    tracing::info!(
        file = %file.display(),
        mount = %mount_path.display(),
        "Backing file mounted"
    );
    Ok(())
}

/// Unmount the backing file and delete its mount point.
///
/// The mount point is only deleted once nothing is mounted on it, so a
/// failed unmount never deletes the pod's data. The first failure wins.
pub fn unmount_loopback(device: &dyn DeviceOps, mount_path: &Path) -> FlexResult<()> {
    let unmounted = device.unmount(mount_path);

    if unmounted.is_err() && device.is_mounted(mount_path).unwrap_or(true) {
        return unmounted;
    }

    let removed = remove_dir_all_if_exists(mount_path)
        .map_err(|e| FlexError::io("failed to delete fs-in-file mount point", e));

    unmounted.and(removed)?;
    tracing::debug!(mount = %mount_path.display(), "Backing file unmounted");
    Ok(())
}
