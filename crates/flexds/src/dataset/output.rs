//! Output dataset upload.

use std::path::Path;

use flexds_common::{FlexError, FlexResult};
use flexds_transfer::{Descriptor, ObjectRef, Transfer};

/// Upload the contents of `path` as the output dataset, if one is configured.
///
/// `path` must be the merged overlay view so that both the input and
/// everything the pod wrote end up in the upload.
pub async fn handle_output(
    path: &Path,
    output: Option<&ObjectRef>,
    transfer: &dyn Transfer,
) -> FlexResult<Option<Descriptor>> {
    let Some(reference) = output else {
        tracing::debug!(path = %path.display(), "No output dataset configured");
        return Ok(None);
    };

    tracing::info!(%reference, path = %path.display(), "Uploading output dataset");
    let descriptor = transfer
        .upload(reference, path)
        .await
        .map_err(|e| FlexError::transfer("failed to upload data to object storage", e))?;

    tracing::info!(
        bucket = %descriptor.bucket,
        key = %descriptor.key,
        size = descriptor.size,
        digest = %descriptor.digest,
        "Output dataset uploaded"
    );
    Ok(Some(descriptor))
}
