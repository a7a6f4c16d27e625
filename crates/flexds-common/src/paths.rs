//! Paths derived from a pod-visible mount point.
//!
//! `mount` and `unmount` run as separate processes, so every auxiliary path
//! must be recomputable from the mount point alone.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{FlexError, FlexResult};

/// Suffix of the input directory.
pub const INPUT_SUFFIX: &str = "input";
/// Suffix of the backing file.
pub const VOLUME_SUFFIX: &str = "volume";
/// Suffix of the backing file's mount point.
pub const MOUNT_SUFFIX: &str = "mount";
/// Suffix of the volume options file.
pub const OPTIONS_SUFFIX: &str = "json";

/// Identifies one mounted volume by its pod-visible mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountContext {
    target: PathBuf,
    parent: PathBuf,
    base: OsString,
}

impl MountContext {
    /// Create a context for the given mount point.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the path has no final component.
    pub fn new(target: impl Into<PathBuf>) -> FlexResult<Self> {
        let target = target.into();
        let base = target
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                FlexError::validation(format!(
                    "mount path '{}' has no final component",
                    target.display()
                ))
            })?;
        let parent = target
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Ok(Self {
            target,
            parent,
            base,
        })
    }

    /// The pod-visible mount point.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Directory holding the mount point and all derived paths.
    #[must_use]
    pub fn parent(&self) -> &Path {
        &self.parent
    }

    /// `<parent>/<base>.<suffix>`.
    #[must_use]
    pub fn derived(&self, suffix: &str) -> PathBuf {
        let mut name = self.base.clone();
        name.push(".");
        name.push(suffix);
        self.parent.join(name)
    }

    /// Directory the input dataset is downloaded into.
    #[must_use]
    pub fn input_dir(&self) -> PathBuf {
        self.derived(INPUT_SUFFIX)
    }

    /// File holding the writable filesystem.
    #[must_use]
    pub fn volume_file(&self) -> PathBuf {
        self.derived(VOLUME_SUFFIX)
    }

    /// Mount point of the backing file.
    #[must_use]
    pub fn backing_mount(&self) -> PathBuf {
        self.derived(MOUNT_SUFFIX)
    }

    /// Sidecar file with the volume options.
    #[must_use]
    pub fn options_file(&self) -> PathBuf {
        self.derived(OPTIONS_SUFFIX)
    }

    /// Overlay upper directory (inside the backing mount).
    #[must_use]
    pub fn upper_dir(&self) -> PathBuf {
        self.backing_mount().join("upper")
    }

    /// Overlay work directory (inside the backing mount).
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.backing_mount().join("work")
    }
}
