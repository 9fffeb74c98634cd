//! Wire protocol error types.

use thiserror::Error;

/// Stream-level framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Accumulation buffer grew past its ceiling without a closing ETX.
    /// Fatal for the stream: the buffered bytes are logically lost.
    #[error("receive buffer limit exceeded: {buffered} bytes buffered, limit {limit}")]
    ResourceExceeded {
        /// Bytes held when the limit was hit
        buffered: usize,
        /// Configured ceiling
        limit: usize,
    },
}

/// Header decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload shorter than the fixed layout requires
    #[error("{layout} too short: need {needed} bytes, got {actual}")]
    TooShort {
        /// Name of the layout being decoded
        layout: &'static str,
        /// Minimum number of bytes required
        needed: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Interface name is not valid UTF-8
    #[error("invalid interface name: {0}")]
    InvalidText(#[from] std::str::Utf8Error),
}

impl DecodeError {
    pub(crate) fn too_short(layout: &'static str, needed: usize, actual: usize) -> Self {
        DecodeError::TooShort {
            layout,
            needed,
            actual,
        }
    }
}
