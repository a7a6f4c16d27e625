//! Transfer client interface.

use std::path::Path;

use async_trait::async_trait;

use crate::error::TransferError;
use crate::reference::{Descriptor, ObjectRef};

/// Downloads and uploads datasets.
///
/// Both operations are safe to retry: a download overwrites whatever a
/// previous attempt left in the destination, an upload replaces the object.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Download the dataset at `reference` into the directory `dest`.
    async fn download(&self, reference: &ObjectRef, dest: &Path) -> Result<(), TransferError>;

    /// Upload the contents of the directory `src` as the dataset at `reference`.
    async fn upload(&self, reference: &ObjectRef, src: &Path)
    -> Result<Descriptor, TransferError>;
}
