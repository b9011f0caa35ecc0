//! Attribute values and access permissions.

pub use {perm::*, value::*};

use crate::bus::ReqError;

mod perm;
mod value;

/// Reason for rejecting an attribute access.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Denied {
    #[error("attribute is not readable")]
    NotReadable,
    #[error("attribute is not writable")]
    NotWritable,
    #[error("value length {len} exceeds maximum of {max}")]
    TooLong { len: usize, max: usize },
    #[error("offset {off} is past the end of a {len}-byte value")]
    InvalidOffset { off: usize, len: usize },
}

impl Denied {
    /// Returns the matching daemon-visible error.
    #[inline]
    #[must_use]
    pub const fn to_req(self) -> ReqError {
        match self {
            Self::NotReadable | Self::NotWritable => ReqError::NotPermitted,
            Self::TooLong { .. } => ReqError::InvalidValueLength,
            Self::InvalidOffset { .. } => ReqError::InvalidOffset,
        }
    }
}
