//! Volume driver orchestration.
//!
//! `mount` runs five steps and undoes the completed ones if a later step
//! fails. `unmount` uploads the output once and then tears everything down,
//! attempting every cleanup step whose mount was released and reporting all
//! failures together.

pub mod rollback;

use std::path::Path;

use async_trait::async_trait;
use flexds_common::{FlexError, FlexResult, InPhase, MountContext, Phase};
use flexds_transfer::{Descriptor, Transfer};
use serde::{Deserialize, Serialize};

use crate::config::FlexConfig;
use crate::dataset::{
    DatasetOptions, MountOptions, OptionsStore, destroy_input, handle_output, provision_input,
};
use crate::filesystem::backing::{
    create_backing_file, destroy_backing_file, mount_loopback, unmount_loopback,
};
use crate::filesystem::{DeviceOps, OverlayLayout};

pub use rollback::Rollback;

/// Features the driver advertises to the kubelet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether the driver implements attach/detach.
    pub attach: bool,
}

/// The operations of a FlexVolume driver.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Initialize the driver and report its capabilities.
    fn init(&self) -> FlexResult<Capabilities>;

    /// Provision the volume at `target`.
    async fn mount(&self, target: &Path, options: &MountOptions) -> FlexResult<()>;

    /// Tear down the volume at `target`.
    async fn unmount(&self, target: &Path) -> FlexResult<()>;
}

/// Volumes built from a loopback backing file, an input dataset and an
/// overlay, with the result uploaded on unmount.
pub struct DatasetVolumes {
    config: FlexConfig,
    device: Box<dyn DeviceOps>,
    transfer: Box<dyn Transfer>,
    options: OptionsStore,
}

impl DatasetVolumes {
    /// Create a driver.
    pub fn new(
        config: FlexConfig,
        device: impl DeviceOps + 'static,
        transfer: impl Transfer + 'static,
    ) -> Self {
        Self {
            config,
            device: Box::new(device),
            transfer: Box::new(transfer),
            options: OptionsStore::new(),
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &FlexConfig {
        &self.config
    }

    /// Run the mount steps, undoing the completed ones on failure.
    async fn provision(&self, ctx: &MountContext, dataset: &DatasetOptions) -> FlexResult<()> {
        let mut rollback = Rollback::new();

        match self.provision_steps(ctx, dataset, &mut rollback).await {
            Ok(()) => {
                rollback.commit();
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    volume = %ctx.target().display(),
                    steps = rollback.len(),
                    "Mount failed, rolling back"
                );
                let undone = rollback.unwind();
                Err(FlexError::RolledBack {
                    source: Box::new(err),
                    undone,
                })
            }
        }
    }

    async fn provision_steps<'a>(
        &'a self,
        ctx: &'a MountContext,
        dataset: &'a DatasetOptions,
        rollback: &mut Rollback<'a>,
    ) -> FlexResult<()> {
        let device = self.device.as_ref();
        let store = self.options;

        let options_file = ctx.options_file();
        started(ctx, Phase::SaveOptions);
        finished(ctx, Phase::SaveOptions, store.save(&options_file, dataset))?;
        rollback.push(Phase::SaveOptions, move || store.delete(&options_file));

        let input_dir = ctx.input_dir();
        started(ctx, Phase::ProvisionInput);
        let provisioned =
            provision_input(&input_dir, dataset.input.as_ref(), self.transfer.as_ref()).await;
        finished(ctx, Phase::ProvisionInput, provisioned)?;
        rollback.push(Phase::ProvisionInput, move || destroy_input(&input_dir));

        let volume_file = ctx.volume_file();
        started(ctx, Phase::CreateBackingFile);
        let created = create_backing_file(
            device,
            &volume_file,
            self.config.filesystem,
            self.config.write_space,
        );
        finished(ctx, Phase::CreateBackingFile, created)?;
        let backing_file = volume_file.clone();
        rollback.push(Phase::CreateBackingFile, move || {
            destroy_backing_file(&backing_file)
        });

        let backing_mount = ctx.backing_mount();
        started(ctx, Phase::MountLoopback);
        let mounted = mount_loopback(device, &volume_file, &backing_mount);
        finished(ctx, Phase::MountLoopback, mounted)?;
        rollback.push(Phase::MountLoopback, move || {
            unmount_loopback(device, &backing_mount)
        });

        started(ctx, Phase::ComposeOverlay);
        let composed = OverlayLayout::for_volume(ctx).compose(device);
        finished(ctx, Phase::ComposeOverlay, composed)
    }

    /// Unmount and delete everything but the options file.
    ///
    /// Every step runs regardless of earlier failures, except that a layer
    /// is never deleted while the mount on top of it is still up. The
    /// failures are returned in step order.
    fn teardown(&self, ctx: &MountContext) -> Vec<FlexError> {
        let device = self.device.as_ref();
        let mut errors = Vec::new();
        let mut collect = |phase: Phase, result: FlexResult<()>| match finished(ctx, phase, result) {
            Ok(()) => true,
            Err(err) => {
                errors.push(err);
                false
            }
        };

        started(ctx, Phase::DecomposeOverlay);
        let decomposed = collect(
            Phase::DecomposeOverlay,
            OverlayLayout::for_volume(ctx).decompose(device),
        );

        started(ctx, Phase::UnmountLoopback);
        let unmounted = collect(
            Phase::UnmountLoopback,
            unmount_loopback(device, &ctx.backing_mount()),
        );

        let volume_file = ctx.volume_file();
        started(ctx, Phase::DestroyBackingFile);
        collect(
            Phase::DestroyBackingFile,
            if unmounted {
                destroy_backing_file(&volume_file)
            } else {
                Err(FlexError::InUse { path: volume_file })
            },
        );

        // The input is the overlay's lower layer.
        let input_dir = ctx.input_dir();
        started(ctx, Phase::DestroyInput);
        collect(
            Phase::DestroyInput,
            if decomposed {
                destroy_input(&input_dir)
            } else {
                Err(FlexError::InUse { path: input_dir })
            },
        );

        errors
    }

    /// Upload the output while the overlay still shows the pod's writes.
    ///
    /// Returns the descriptor of a new upload; an output recorded as
    /// uploaded by an earlier attempt is not uploaded again.
    async fn upload_output(
        &self,
        ctx: &MountContext,
        dataset: &DatasetOptions,
    ) -> FlexResult<Option<Descriptor>> {
        if dataset.output.is_none() {
            return Ok(None);
        }
        if let Some(uploaded) = &dataset.uploaded {
            tracing::info!(
                volume = %ctx.target().display(),
                digest = %uploaded.digest,
                "Output already uploaded"
            );
            return Ok(None);
        }

        started(ctx, Phase::HandleOutput);
        let uploaded = match self.device.is_mounted(ctx.target()) {
            Ok(true) => {
                handle_output(ctx.target(), dataset.output.as_ref(), self.transfer.as_ref()).await
            }
            Ok(false) => {
                tracing::warn!(
                    volume = %ctx.target().display(),
                    "Overlay is no longer mounted, skipping output upload"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        };
        finished(ctx, Phase::HandleOutput, uploaded)
    }
}

impl std::fmt::Debug for DatasetVolumes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetVolumes")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VolumeDriver for DatasetVolumes {
    fn init(&self) -> FlexResult<Capabilities> {
        tracing::debug!(
            filesystem = %self.config.filesystem,
            write_space = %self.config.write_space,
            "Driver initialized"
        );
        Ok(Capabilities { attach: false })
    }

    async fn mount(&self, target: &Path, options: &MountOptions) -> FlexResult<()> {
        let ctx = MountContext::new(target)?;
        let dataset = DatasetOptions::from_mount_options(options)?;

        tracing::info!(
            volume = %ctx.target().display(),
            input = ?dataset.input,
            output = ?dataset.output,
            "Mounting volume"
        );

        match self.options.load(&ctx.options_file()) {
            Err(err) if err.is_not_found() => {}
            existing => {
                if self.device.is_mounted(ctx.target())? {
                    return match existing {
                        Ok(current) if current.same_datasets(&dataset) => {
                            tracing::info!(
                                volume = %ctx.target().display(),
                                "Volume already mounted"
                            );
                            Ok(())
                        }
                        Ok(_) => Err(FlexError::validation(format!(
                            "{} is already mounted with different options",
                            ctx.target().display()
                        ))),
                        Err(err) => finished(&ctx, Phase::LoadOptions, Err(err)),
                    };
                }

                tracing::warn!(
                    volume = %ctx.target().display(),
                    "Found leftovers of an incomplete mount, cleaning up"
                );
                for err in self.teardown(&ctx) {
                    tracing::warn!(error = %err, "Cleanup of previous attempt failed");
                }
            }
        }

        self.provision(&ctx, &dataset).await?;

        tracing::info!(volume = %ctx.target().display(), "Volume mounted");
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> FlexResult<()> {
        let ctx = MountContext::new(target)?;
        let options_file = ctx.options_file();

        tracing::info!(volume = %ctx.target().display(), "Unmounting volume");

        started(&ctx, Phase::LoadOptions);
        let mut dataset = match self.options.load(&options_file) {
            Err(err) if err.is_not_found() => {
                tracing::warn!(
                    volume = %ctx.target().display(),
                    "No volume options found, volume is already unmounted"
                );
                return Ok(());
            }
            loaded => finished(&ctx, Phase::LoadOptions, loaded)?,
        };

        let mut errors = Vec::new();
        match self.upload_output(&ctx, &dataset).await {
            Ok(Some(descriptor)) => {
                // A retried unmount must not upload again.
                dataset.uploaded = Some(descriptor);
                if let Err(err) = self.options.save(&options_file, &dataset) {
                    tracing::warn!(
                        volume = %ctx.target().display(),
                        error = %err,
                        "Failed to record the output upload"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => errors.push(err),
        }

        let failed = self.teardown(&ctx);
        if failed.is_empty() {
            started(&ctx, Phase::DeleteOptions);
            let deleted = self.options.delete(&options_file);
            if let Err(err) = finished(&ctx, Phase::DeleteOptions, deleted) {
                errors.push(err);
            }
        } else {
            tracing::warn!(
                volume = %ctx.target().display(),
                "Keeping volume options so the unmount can be retried"
            );
            errors.extend(failed);
        }

        if errors.len() > 1 {
            return Err(FlexError::Teardown { errors });
        }
        if let Some(err) = errors.pop() {
            return Err(err);
        }

        tracing::info!(volume = %ctx.target().display(), "Volume unmounted");
        Ok(())
    }
}

fn started(ctx: &MountContext, phase: Phase) {
    tracing::debug!(%phase, volume = %ctx.target().display(), "Phase started");
}

/// Log the outcome of a phase and attach the phase to its error.
fn finished<T>(ctx: &MountContext, phase: Phase, result: FlexResult<T>) -> FlexResult<T> {
    match &result {
        Ok(_) => tracing::debug!(%phase, volume = %ctx.target().display(), "Phase finished"),
        Err(err) => tracing::error!(
            %phase,
            volume = %ctx.target().display(),
            error = %err,
            "Phase failed"
        ),
    }
    result.in_phase(phase)
}
