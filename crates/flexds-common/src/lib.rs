//! # flexds-common
//!
//! Shared utilities and types for the flexds volume driver.
//!
//! This crate provides common functionality used across all flexds crates:
//! - The error taxonomy reported back to the kubelet
//! - Named lifecycle phases of the mount and unmount pipelines
//! - Deterministic derivation of per-volume paths
//! - Byte size parsing for the backing store quota

#![warn(missing_docs)]

pub mod error;
pub mod paths;
pub mod phase;
pub mod size;

pub use error::{FlexError, FlexResult};
pub use paths::MountContext;
pub use phase::{InPhase, Phase};
pub use size::ByteSize;
