//! Recording fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flexds::config::FlexConfig;
use flexds::driver::DatasetVolumes;
use flexds::filesystem::{DeviceOps, FileSystem};
use flexds_common::{ByteSize, FlexError, FlexResult};
use flexds_transfer::{Descriptor, ObjectRef, Transfer, TransferError};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Name of the file the fake download writes.
pub const DOWNLOADED_FILE: &str = "dataset.csv";

/// Contents of [`DOWNLOADED_FILE`].
pub const DOWNLOADED_CONTENTS: &str = "id,value\n1,42\n";

/// Ordered log of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.starts_with(prefix))
    }
}

type Hook = Arc<dyn Fn(&Path) + Send + Sync>;

/// [`DeviceOps`] that tracks mounts in memory and never touches the kernel.
#[derive(Clone, Default)]
pub struct RecordingDevice {
    journal: Journal,
    mounted: Arc<Mutex<HashSet<PathBuf>>>,
    failing: Arc<Mutex<HashSet<&'static str>>>,
    hooks: Arc<Mutex<Vec<(&'static str, Hook)>>>,
}

impl RecordingDevice {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Make `operation` (`format`, `mount-loopback`, `mount-overlay`,
    /// `unmount`) fail until [`RecordingDevice::heal`] is called.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    /// Call `hook` with the file or target path whenever `operation` runs,
    /// before it succeeds or fails.
    pub fn before(&self, operation: &'static str, hook: impl Fn(&Path) + Send + Sync + 'static) {
        self.hooks.lock().push((operation, Arc::new(hook)));
    }

    fn run_hooks(&self, operation: &'static str, path: &Path) {
        let hooks: Vec<Hook> = self
            .hooks
            .lock()
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(path);
        }
    }

    fn check(&self, operation: &'static str, target: &Path) -> FlexResult<()> {
        if self.failing.lock().contains(operation) {
            return Err(FlexError::Mount {
                context: format!("failed to {operation} {}", target.display()),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl DeviceOps for RecordingDevice {
    fn format(&self, path: &Path, filesystem: FileSystem) -> FlexResult<()> {
        self.journal
            .record(format!("format {filesystem} {}", path.display()));
        if self.failing.lock().contains("format") {
            return Err(FlexError::Format {
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn mount_loopback(&self, file: &Path, target: &Path) -> FlexResult<()> {
        self.journal.record(format!(
            "mount-loopback {} {}",
            file.display(),
            target.display()
        ));
        self.run_hooks("mount-loopback", file);
        self.check("mount-loopback", target)?;
        self.mounted.lock().insert(target.to_path_buf());
        Ok(())
    }

    fn mount_overlay(&self, options: &str, target: &Path) -> FlexResult<()> {
        self.journal
            .record(format!("mount-overlay {} {options}", target.display()));
        self.check("mount-overlay", target)?;
        self.mounted.lock().insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> FlexResult<()> {
        self.journal.record(format!("unmount {}", target.display()));
        self.run_hooks("unmount", target);
        self.check("unmount", target)?;
        self.mounted.lock().remove(target);
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> FlexResult<bool> {
        Ok(self.mounted.lock().contains(path))
    }
}

/// [`Transfer`] that writes a fixed file on download and records uploads.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransfer {
    journal: Journal,
    fail_upload: Arc<Mutex<bool>>,
}

impl RecordingTransfer {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn fail_uploads(&self) {
        *self.fail_upload.lock() = true;
    }
}

#[async_trait]
impl Transfer for RecordingTransfer {
    async fn download(&self, reference: &ObjectRef, dest: &Path) -> Result<(), TransferError> {
        self.journal
            .record(format!("download {reference} {}", dest.display()));
        std::fs::write(dest.join(DOWNLOADED_FILE), DOWNLOADED_CONTENTS)
            .map_err(|e| TransferError::archive(dest, e))
    }

    async fn upload(&self, reference: &ObjectRef, src: &Path) -> Result<Descriptor, TransferError> {
        self.journal
            .record(format!("upload {reference} {}", src.display()));
        if *self.fail_upload.lock() {
            return Err(TransferError::Config {
                message: "injected failure".to_string(),
            });
        }
        Ok(Descriptor {
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
            size: 0,
            digest: "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
                .to_string(),
            e_tag: None,
        })
    }
}

/// A driver wired to recording fakes, with a pod volume directory.
pub struct Harness {
    pub dir: TempDir,
    pub target: PathBuf,
    pub journal: Journal,
    pub device: RecordingDevice,
    pub transfer: RecordingTransfer,
    pub driver: DatasetVolumes,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data");
        std::fs::create_dir(&target).unwrap();

        let journal = Journal::default();
        let device = RecordingDevice::new(journal.clone());
        let transfer = RecordingTransfer::new(journal.clone());
        let config = FlexConfig::default().with_write_space(ByteSize::mebibytes(1));
        let driver = DatasetVolumes::new(config, device.clone(), transfer.clone());

        Self {
            dir,
            target,
            journal,
            device,
            transfer,
            driver,
        }
    }

    /// Sorted names of everything next to the mount point.
    pub fn siblings(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn path(&self, suffix: &str) -> PathBuf {
        self.dir.path().join(format!("data{suffix}"))
    }
}
