//! Datasets flowing into and out of a volume.
//!
//! - [`options`]: the dataset references of a volume and their sidecar file
//! - [`input`]: downloading the input dataset before the overlay exists
//! - [`output`]: uploading the volume contents before teardown

pub mod input;
pub mod options;
pub mod output;

pub use input::{destroy_input, provision_input};
pub use options::{DatasetOptions, MountOptions, OptionsStore};
pub use output::handle_output;
