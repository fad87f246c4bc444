//! Error types shared by the transcode codec crates.
//!
//! Codec crates wrap [`Error`] in their own error enums; this module only
//! covers failures that can happen below the codec layer (bit access and
//! picture buffer handling).

use thiserror::Error;

/// Main error type for the core crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bitstream access errors.
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Buffer too small for operation.
    #[error("Buffer too small: need {needed} samples, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Sample storage could not be reserved.
    #[error("Allocation of {samples} samples failed")]
    AllocationFailed { samples: usize },
}

/// Bitstream access errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitstreamError {
    /// Unexpected end of bitstream.
    #[error("Unexpected end of bitstream")]
    UnexpectedEnd,

    /// Exp-Golomb prefix longer than 31 bits.
    #[error("Exp-Golomb decoding error: value too large")]
    ExpGolombOverflow,

    /// Alignment padding contained a one bit.
    #[error("Non-zero alignment bits at bit offset {offset}")]
    NonZeroAlignment { offset: usize },

    /// Operation requires a byte-aligned position.
    #[error("Bit alignment error")]
    AlignmentError,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Check if this error was caused by running out of input bits.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(self, Error::Bitstream(BitstreamError::UnexpectedEnd))
    }
}
