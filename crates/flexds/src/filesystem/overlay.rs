//! OverlayFS composition at the pod-visible mount point.

use std::path::{Path, PathBuf};

use flexds_common::{FlexError, FlexResult, MountContext};

use super::mounts::DeviceOps;
use super::{create_dir, remove_dir_all_if_exists};

/// OverlayFS layout of one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLayout {
    /// Read-only input directory.
    pub lower_dir: PathBuf,
    /// Writable layer inside the backing mount.
    pub upper_dir: PathBuf,
    /// Work directory required by overlayfs (inside the backing mount).
    pub work_dir: PathBuf,
    /// Pod-visible mount point, provided by the kubelet.
    pub merged_dir: PathBuf,
}

impl OverlayLayout {
    /// Create a layout from explicit directories.
    #[must_use]
    pub fn new(lower_dir: PathBuf, backing_mount: &Path, merged_dir: PathBuf) -> Self {
        Self {
            lower_dir,
            upper_dir: backing_mount.join("upper"),
            work_dir: backing_mount.join("work"),
            merged_dir,
        }
    }

    /// Layout of the volume identified by `ctx`.
    #[must_use]
    pub fn for_volume(ctx: &MountContext) -> Self {
        Self {
            lower_dir: ctx.input_dir(),
            upper_dir: ctx.upper_dir(),
            work_dir: ctx.work_dir(),
            merged_dir: ctx.target().to_path_buf(),
        }
    }

    /// Get the mount options string.
    #[must_use]
    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }

    /// Mount the overlay at the merged directory.
    ///
    /// The upper and work directories are created if needed; the merged
    /// directory must already exist. Directories created here are removed
    /// again if the mount fails.
    pub fn compose(&self, device: &dyn DeviceOps) -> FlexResult<()> {
        if !self.merged_dir.is_dir() {
            return Err(FlexError::io(
                format!("mount point {} is not a directory", self.merged_dir.display()),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        let mut created = Vec::new();
        for dir in [&self.upper_dir, &self.work_dir] {
            match create_dir(dir) {
                Ok(true) => created.push(dir),
                Ok(false) => {}
                Err(e) => {
                    Self::remove_created(&created);
                    return Err(FlexError::io("failed to create directories", e));
                }
            }
        }

        if let Err(err) = device.mount_overlay(&self.mount_options(), &self.merged_dir) {
            Self::remove_created(&created);
            return Err(err);
        }

        tracing::info!(merged = %self.merged_dir.display(), "OverlayFS mounted successfully");
        Ok(())
    }

    /// Unmount the overlay and delete the upper and work directories.
    ///
    /// Succeeds if the overlay is already gone.
    pub fn decompose(&self, device: &dyn DeviceOps) -> FlexResult<()> {
        device.unmount(&self.merged_dir)?;

        for dir in [&self.upper_dir, &self.work_dir] {
            remove_dir_all_if_exists(dir)
                .map_err(|e| FlexError::io("failed to delete directories", e))?;
        }

        tracing::info!(merged = %self.merged_dir.display(), "OverlayFS unmounted successfully");
        Ok(())
    }

    fn remove_created(created: &[&PathBuf]) {
        for dir in created {
            if let Err(e) = remove_dir_all_if_exists(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove overlay directory");
            }
        }
    }
}
