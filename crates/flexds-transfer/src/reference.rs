//! Dataset references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of a dataset in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectRef {
    /// Object key.
    pub key: String,
    /// Bucket holding the object.
    pub bucket: String,
}

impl ObjectRef {
    /// Create a reference.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            bucket: bucket.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Describes an uploaded dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Bucket the dataset was written to.
    pub bucket: String,
    /// Key the dataset was written to.
    pub key: String,
    /// Size of the uploaded archive in bytes.
    pub size: u64,
    /// Content digest of the archive (`sha256:<hex>`).
    pub digest: String,
    /// Entity tag reported by the store, if any.
    pub e_tag: Option<String>,
}
