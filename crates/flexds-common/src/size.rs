//! Byte size parsing and representation.
//!
//! Supports Kubernetes-style storage quantities:
//! - Binary: "128Ki", "100Mi", "1Gi", "1Ti"
//! - Decimal: "128k", "512M", "1G", "1T"
//! - Plain bytes: "1048576"

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FlexError, FlexResult};

const KI: u64 = 1024;
const MI: u64 = 1024 * 1024;
const GI: u64 = 1024 * 1024 * 1024;
const TI: u64 = 1024 * 1024 * 1024 * 1024;

/// A size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ByteSize(u64);

impl ByteSize {
    /// Create a size from bytes.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create a size from mebibytes (MiB).
    #[must_use]
    pub const fn mebibytes(mib: u64) -> Self {
        Self(mib * MI)
    }

    /// Create a size from gibibytes (GiB).
    #[must_use]
    pub const fn gibibytes(gib: u64) -> Self {
        Self(gib * GI)
    }

    /// Get the size in bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Parse a size string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown suffixes, non-numeric
    /// values, or sizes that overflow `u64`.
    pub fn parse(s: &str) -> FlexResult<Self> {
        let s = s.trim();
        let invalid = || FlexError::config(format!("invalid size: '{s}'"));

        let suffixes = [
            ("Ki", KI),
            ("Mi", MI),
            ("Gi", GI),
            ("Ti", TI),
            ("k", 1000u64),
            ("M", 1000 * 1000),
            ("G", 1000 * 1000 * 1000),
            ("T", 1000 * 1000 * 1000 * 1000),
        ];

        for (suffix, multiplier) in suffixes {
            if let Some(stripped) = s.strip_suffix(suffix) {
                let value: u64 = stripped.trim().parse().map_err(|_| invalid())?;
                return value.checked_mul(multiplier).map(Self).ok_or_else(invalid);
            }
        }

        s.parse().map(Self).map_err(|_| invalid())
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value >= TI && value % TI == 0 {
            write!(f, "{}Ti", value / TI)
        } else if value >= GI && value % GI == 0 {
            write!(f, "{}Gi", value / GI)
        } else if value >= MI && value % MI == 0 {
            write!(f, "{}Mi", value / MI)
        } else if value >= KI && value % KI == 0 {
            write!(f, "{}Ki", value / KI)
        } else {
            write!(f, "{value}")
        }
    }
}

impl FromStr for ByteSize {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ByteSize {
    type Error = FlexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ByteSize> for String {
    fn from(size: ByteSize) -> Self {
        size.to_string()
    }
}
