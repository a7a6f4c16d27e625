//! Volume options and their persistence.
//!
//! `mount` and `unmount` are separate process invocations; the options
//! given at mount time survive in a JSON file next to the mount point.

use std::io::ErrorKind;
use std::path::Path;

use flexds_common::{FlexError, FlexResult};
use flexds_transfer::{Descriptor, ObjectRef};
use serde::{Deserialize, Serialize};

/// Options passed by the kubelet on mount.
///
/// The kubelet adds `kubernetes.io/*` keys (pod name, namespace, ...) which
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Key of the input dataset.
    #[serde(rename = "input/s3Key")]
    pub input_s3_key: String,
    /// Bucket of the input dataset.
    #[serde(rename = "input/s3Bucket")]
    pub input_s3_bucket: String,
    /// Key the output dataset is uploaded to.
    #[serde(rename = "output/s3Key")]
    pub output_s3_key: String,
    /// Bucket the output dataset is uploaded to.
    #[serde(rename = "output/s3Bucket")]
    pub output_s3_bucket: String,
}

impl MountOptions {
    /// Parse the JSON options argument.
    pub fn from_json(json: &str) -> FlexResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| FlexError::validation(format!("failed to parse mount options: {e}")))
    }
}

/// Validated dataset references of one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetOptions {
    /// Dataset to populate the volume with.
    #[serde(rename = "Input")]
    pub input: Option<ObjectRef>,
    /// Dataset to store the volume contents in on unmount.
    #[serde(rename = "Output")]
    pub output: Option<ObjectRef>,
    /// The stored output, once an unmount has uploaded it.
    #[serde(rename = "Uploaded", default, skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<Descriptor>,
}

impl DatasetOptions {
    /// Build dataset options from the kubelet's mount options.
    ///
    /// A reference is configured by its key; a key without a bucket is
    /// rejected.
    pub fn from_mount_options(opts: &MountOptions) -> FlexResult<Self> {
        Ok(Self {
            input: reference("input", &opts.input_s3_bucket, &opts.input_s3_key)?,
            output: reference("output", &opts.output_s3_bucket, &opts.output_s3_key)?,
            uploaded: None,
        })
    }

    /// Whether both volumes were requested with the same datasets.
    #[must_use]
    pub fn same_datasets(&self, other: &Self) -> bool {
        self.input == other.input && self.output == other.output
    }
}

fn reference(side: &str, bucket: &str, key: &str) -> FlexResult<Option<ObjectRef>> {
    if key.is_empty() {
        return Ok(None);
    }
    if bucket.is_empty() {
        return Err(FlexError::validation(format!(
            "{side} key configured without a bucket"
        )));
    }
    Ok(Some(ObjectRef::new(bucket, key)))
}

/// Reads and writes the options file of a volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsStore;

impl OptionsStore {
    /// Create a store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Write `opts` to `path`, replacing any existing file.
    pub fn save(&self, path: &Path, opts: &DatasetOptions) -> FlexResult<()> {
        let mut json = serde_json::to_vec(opts)
            .map_err(|e| FlexError::validation(format!("failed to encode options: {e}")))?;
        json.push(b'\n');
        std::fs::write(path, json).map_err(|e| FlexError::io("failed to create options file", e))?;

        tracing::debug!(path = %path.display(), "Saved volume options");
        Ok(())
    }

    /// Read the options at `path`.
    ///
    /// # Errors
    ///
    /// [`FlexError::NotFound`] if the file does not exist,
    /// [`FlexError::Decode`] if it is not valid options JSON.
    pub fn load(&self, path: &Path) -> FlexResult<DatasetOptions> {
        let json = match std::fs::read(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FlexError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(FlexError::io("failed to open options file", e)),
        };

        let opts = serde_json::from_slice(&json).map_err(|e| FlexError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), "Loaded volume options");
        Ok(opts)
    }

    /// Delete the options at `path`. An absent file counts as deleted.
    pub fn delete(&self, path: &Path) -> FlexResult<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(FlexError::io("failed to delete options file", e))
            }
            _ => {
                tracing::debug!(path = %path.display(), "Deleted volume options");
                Ok(())
            }
        }
    }
}
