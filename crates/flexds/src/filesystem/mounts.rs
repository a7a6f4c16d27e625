//! Block device and mount primitives.
//!
//! Everything that needs root or kernel support goes through [`DeviceOps`],
//! so the volume pipeline can be exercised with a fake.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use flexds_common::{FlexError, FlexResult};
use serde::{Deserialize, Serialize};

/// Filesystems the backing file can be formatted with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystem {
    /// ext4, supported everywhere.
    #[default]
    Ext4,
    /// ext3.
    Ext3,
    /// ext2.
    Ext2,
    /// XFS.
    Xfs,
}

impl FileSystem {
    /// Name as understood by `mkfs -t`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Ext3 => "ext3",
            Self::Ext2 => "ext2",
            Self::Xfs => "xfs",
        }
    }
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileSystem {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ext4" => Ok(Self::Ext4),
            "ext3" => Ok(Self::Ext3),
            "ext2" => Ok(Self::Ext2),
            "xfs" => Ok(Self::Xfs),
            other => Err(FlexError::config(format!(
                "unsupported filesystem '{other}' (expected ext4, ext3, ext2 or xfs)"
            ))),
        }
    }
}

/// Privileged operations needed to build a volume.
pub trait DeviceOps: Send + Sync {
    /// Format the file at `path` with `filesystem`.
    fn format(&self, path: &Path, filesystem: FileSystem) -> FlexResult<()>;

    /// Mount the file at `file` through a loop device at `target`.
    fn mount_loopback(&self, file: &Path, target: &Path) -> FlexResult<()>;

    /// Mount an overlay at `target` with the given `lowerdir=..` options.
    fn mount_overlay(&self, options: &str, target: &Path) -> FlexResult<()>;

    /// Unmount `target`. Succeeds if nothing is mounted there.
    fn unmount(&self, target: &Path) -> FlexResult<()>;

    /// Whether `path` is currently a mount point.
    fn is_mounted(&self, path: &Path) -> FlexResult<bool>;
}

/// [`DeviceOps`] backed by the host's `mkfs`/`mount` tools and syscalls.
#[derive(Debug, Clone)]
pub struct SystemDevice {
    mountinfo: PathBuf,
}

impl Default for SystemDevice {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
        }
    }
}

impl SystemDevice {
    /// Create a device using the current process' mount table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceOps for SystemDevice {
    fn format(&self, path: &Path, filesystem: FileSystem) -> FlexResult<()> {
        tracing::debug!(path = %path.display(), %filesystem, "Formatting backing file");

        let mut command = Command::new("mkfs");
        command.arg("-t").arg(filesystem.as_str()).arg(path);
        run_captured(command, |message| FlexError::Format { message })
    }

    fn mount_loopback(&self, file: &Path, target: &Path) -> FlexResult<()> {
        tracing::debug!(
            file = %file.display(),
            mount_point = %target.display(),
            "Mounting loop device"
        );

        let mut command = Command::new("mount");
        command.arg("-o").arg("loop").arg(file).arg(target);
        run_captured(command, |message| FlexError::Mount {
            context: "failed to execute mount command".to_string(),
            message,
        })
    }

    fn mount_overlay(&self, options: &str, target: &Path) -> FlexResult<()> {
        tracing::debug!(mount_point = %target.display(), options, "Mounting overlayfs");

        let mut command = Command::new("mount");
        command
            .args(["-t", "overlay", "overlay", "-o", options])
            .arg(target);
        run_captured(command, |message| FlexError::Mount {
            context: "failed to execute overlay mount command".to_string(),
            message,
        })
    }

    #[cfg(target_os = "linux")]
    fn unmount(&self, target: &Path) -> FlexResult<()> {
        use rustix::io::Errno;
        use rustix::mount::{UnmountFlags, unmount};

        tracing::debug!(mount_point = %target.display(), "Unmounting filesystem");

        match unmount(target, UnmountFlags::empty()) {
            Ok(()) => Ok(()),
            Err(e) if e == Errno::INVAL || e == Errno::NOENT => {
                tracing::debug!(mount_point = %target.display(), "Nothing mounted, skipping");
                Ok(())
            }
            Err(e) => Err(FlexError::Mount {
                context: format!("failed to unmount {}", target.display()),
                message: e.to_string(),
            }),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn unmount(&self, _target: &Path) -> FlexResult<()> {
        Err(FlexError::Unsupported {
            feature: "unmount".to_string(),
        })
    }

    fn is_mounted(&self, path: &Path) -> FlexResult<bool> {
        let Ok(canonical) = path.canonicalize() else {
            return Ok(false);
        };
        let table = std::fs::read_to_string(&self.mountinfo).map_err(|e| {
            FlexError::io(
                format!("failed to read {}", self.mountinfo.display()),
                e,
            )
        })?;
        Ok(mountinfo_contains(&table, &canonical))
    }
}

fn run_captured(mut command: Command, on_failure: impl FnOnce(String) -> FlexError) -> FlexResult<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| FlexError::io(format!("failed to run {program}"), e))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("{program} exited with {}", output.status)
    } else {
        stderr
    };
    Err(on_failure(message))
}

/// Whether a `/proc/<pid>/mountinfo` table lists `path` as a mount point.
fn mountinfo_contains(table: &str, path: &Path) -> bool {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .any(|mount_point| Path::new(&unescape_mount_point(mount_point)) == path)
}

/// Decode the octal escapes (`\040` for space, ...) used in mountinfo.
fn unescape_mount_point(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
