//! # flexds
//!
//! A Kubernetes FlexVolume driver that gives every pod an ephemeral volume
//! built from datasets in object storage.
//!
//! ## Volume layout
//!
//! For a pod mount point `<dir>/<name>` the driver maintains:
//!
//! - `<dir>/<name>.json`: the volume's dataset references
//! - `<dir>/<name>.input`: the downloaded input dataset (overlay lower layer)
//! - `<dir>/<name>.volume`: a fixed-size file holding the writable layer
//! - `<dir>/<name>.mount`: where that file is loop mounted
//! - `<dir>/<name>`: the overlay the pod sees
//!
//! On unmount the merged view is uploaded as the output dataset before
//! everything is torn down.
//!
//! ## Usage
//!
//! ```no_run
//! use flexds::config::FlexConfig;
//! use flexds::dataset::MountOptions;
//! use flexds::driver::{DatasetVolumes, VolumeDriver};
//! use flexds::filesystem::SystemDevice;
//! use flexds_transfer::StoreTransfer;
//!
//! # async fn example() -> flexds_common::FlexResult<()> {
//! let config = FlexConfig::load(None)?;
//! let transfer = StoreTransfer::s3(config.s3.clone());
//! let driver = DatasetVolumes::new(config, SystemDevice::new(), transfer);
//!
//! let options = MountOptions::from_json(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#)?;
//! driver.mount("/var/lib/kubelet/pods/p/volumes/x".as_ref(), &options).await?;
//! driver.unmount("/var/lib/kubelet/pods/p/volumes/x".as_ref()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod filesystem;

pub use driver::{DatasetVolumes, VolumeDriver};
