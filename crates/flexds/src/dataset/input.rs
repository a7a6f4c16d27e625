//! Input dataset provisioning.

use std::path::Path;

use flexds_common::{FlexError, FlexResult};
use flexds_transfer::{ObjectRef, Transfer};

use crate::filesystem::{create_dir, remove_dir_all_if_exists};

/// Create the input directory at `path` and fill it from `input`.
///
/// Without an input dataset the directory is left empty, which gives the
/// overlay an empty lower layer. A directory left over from an earlier
/// attempt is reused and the download overwrites its contents; a failed
/// download removes the directory again.
pub async fn provision_input(
    path: &Path,
    input: Option<&ObjectRef>,
    transfer: &dyn Transfer,
) -> FlexResult<()> {
    create_dir(path).map_err(|e| FlexError::io("failed to create input directory", e))?;

    let Some(reference) = input else {
        tracing::debug!(path = %path.display(), "No input dataset configured");
        return Ok(());
    };

    tracing::info!(%reference, path = %path.display(), "Downloading input dataset");
    if let Err(e) = transfer.download(reference, path).await {
        if let Err(cleanup) = remove_dir_all_if_exists(path) {
            tracing::warn!(
                path = %path.display(),
                error = %cleanup,
                "Failed to remove partial input"
            );
        }
        return Err(FlexError::transfer(
            "failed to download data from object storage",
            e,
        ));
    }

    tracing::info!(%reference, "Input dataset downloaded");
    Ok(())
}

/// Delete the input directory and everything in it.
pub fn destroy_input(path: &Path) -> FlexResult<()> {
    remove_dir_all_if_exists(path)
        .map_err(|e| FlexError::io("failed to delete input directory", e))?;
    tracing::debug!(path = %path.display(), "Input directory deleted");
    Ok(())
}
