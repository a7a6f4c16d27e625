//! Volume lifecycle phases.

use crate::error::{FlexError, FlexResult};

/// A single step of the mount or unmount pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Persisting the volume options next to the mount point.
    SaveOptions,
    /// Creating the input directory and downloading the input dataset.
    ProvisionInput,
    /// Creating and formatting the backing file.
    CreateBackingFile,
    /// Mounting the backing file through a loop device.
    MountLoopback,
    /// Mounting the overlay at the pod-visible path.
    ComposeOverlay,
    /// Reading back the volume options.
    LoadOptions,
    /// Uploading the output dataset.
    HandleOutput,
    /// Unmounting the overlay.
    DecomposeOverlay,
    /// Unmounting the backing file.
    UnmountLoopback,
    /// Deleting the backing file.
    DestroyBackingFile,
    /// Deleting the input directory.
    DestroyInput,
    /// Deleting the volume options.
    DeleteOptions,
}

impl Phase {
    /// Message used to wrap an error raised in this phase.
    #[must_use]
    pub const fn failure_message(self) -> &'static str {
        match self {
            Self::SaveOptions => "failed to write volume options",
            Self::ProvisionInput => "failed to provision input",
            Self::CreateBackingFile => "failed to create file system in a file",
            Self::MountLoopback => "failed to mount file system in a file",
            Self::ComposeOverlay => "failed to mount overlayfs",
            Self::LoadOptions => "failed to read volume options",
            Self::HandleOutput => "failed to upload output",
            Self::DecomposeOverlay => "failed to unmount overlayfs",
            Self::UnmountLoopback => "failed to unmount file system in a file",
            Self::DestroyBackingFile => "failed to delete file system in a file",
            Self::DestroyInput => "failed to delete input data",
            Self::DeleteOptions => "failed to delete volume options",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SaveOptions => write!(f, "save-options"),
            Self::ProvisionInput => write!(f, "provision-input"),
            Self::CreateBackingFile => write!(f, "create-backing-file"),
            Self::MountLoopback => write!(f, "mount-loopback"),
            Self::ComposeOverlay => write!(f, "compose-overlay"),
            Self::LoadOptions => write!(f, "load-options"),
            Self::HandleOutput => write!(f, "handle-output"),
            Self::DecomposeOverlay => write!(f, "decompose-overlay"),
            Self::UnmountLoopback => write!(f, "unmount-loopback"),
            Self::DestroyBackingFile => write!(f, "destroy-backing-file"),
            Self::DestroyInput => write!(f, "destroy-input"),
            Self::DeleteOptions => write!(f, "delete-options"),
        }
    }
}

/// Attach a [`Phase`] to the error of a result.
pub trait InPhase<T> {
    /// Wrap the error, if any, with the phase's failure message.
    fn in_phase(self, phase: Phase) -> FlexResult<T>;
}

impl<T> InPhase<T> for FlexResult<T> {
    fn in_phase(self, phase: Phase) -> FlexResult<T> {
        self.map_err(|source| FlexError::Phase {
            phase,
            source: Box::new(source),
        })
    }
}
