//! # flexds-transfer
//!
//! Moves datasets between object storage and local directories.
//!
//! A dataset is a directory tree stored as a single gzip-compressed tar
//! object addressed by bucket and key. The [`Transfer`] trait is what the
//! volume driver depends on; [`StoreTransfer`] implements it on top of any
//! `object_store` backend, S3 being the one used in production.

#![warn(missing_docs)]

pub mod archive;
pub mod error;
pub mod reference;
pub mod store;
pub mod traits;

pub use error::TransferError;
pub use reference::{Descriptor, ObjectRef};
pub use store::{StoreTransfer, TransferConfig};
pub use traits::Transfer;
