//! EVC-specific error types.
//!
//! Hard failures are [`EvcError`] values. Informational outcomes such as
//! "frame delayed" or "no more frames" are not errors; they are status enums
//! returned inside `Ok` by the decoder, encoder and picture manager. Every
//! outcome still maps onto the numeric return codes of the reference tools
//! through the constants in [`codes`].

use thiserror::Error;

/// Numeric return codes shared by errors and informational statuses.
pub mod codes {
    /// Success.
    pub const OK: i32 = 0;
    /// Output exhausted (bumping finished).
    pub const OK_NO_MORE_FRM: i32 = 205;
    /// Encoder output not available yet.
    pub const OK_OUT_NOT_AVAILABLE: i32 = 204;
    /// Picture dimensions changed.
    pub const OK_DIM_CHANGED: i32 = 203;
    /// Output delayed until more input arrives.
    pub const OK_FRM_DELAYED: i32 = 202;
    /// Generic failure.
    pub const ERR: i32 = -1;
    /// Invalid argument.
    pub const ERR_INVALID_ARGUMENT: i32 = -101;
    /// Allocation failure.
    pub const ERR_OUT_OF_MEMORY: i32 = -102;
    /// Capacity reached.
    pub const ERR_REACHED_MAX: i32 = -103;
    /// Unsupported feature.
    pub const ERR_UNSUPPORTED: i32 = -104;
    /// Unexpected internal state.
    pub const ERR_UNEXPECTED: i32 = -105;
    /// Malformed bitstream.
    pub const ERR_MALFORMED_BITSTREAM: i32 = -202;
}

/// EVC codec error type.
#[derive(Error, Debug)]
pub enum EvcError {
    /// NAL unit framing or header error.
    #[error("NAL unit error: {0}")]
    Nal(#[from] NalError),

    /// Bit-level error from the core crate.
    #[error("Core error: {0}")]
    Core(#[from] transcode_core::Error),

    /// Syntax violation in the coded data.
    #[error("Malformed bitstream: {0}")]
    MalformedBitstream(String),

    /// Invalid configuration or call argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Feature outside the supported profile.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Picture buffer allocation failed.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// The picture pool has no free slot.
    #[error("Picture pool capacity of {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    /// A leased picture was not returned the way it was checked out.
    #[error("Picture lease violation: {0}")]
    LeaseViolation(String),

    /// Internal state that should be unreachable for conforming input.
    #[error("Unexpected state: {0}")]
    Unexpected(String),
}

/// NAL unit specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NalError {
    /// forbidden_zero_bit was set.
    #[error("forbidden_zero_bit is set")]
    ForbiddenBit,

    /// nal_unit_type_plus1 was zero.
    #[error("Invalid NAL unit header")]
    InvalidHeader,

    /// NAL unit type not handled by this codec.
    #[error("Invalid NAL unit type: {0}")]
    InvalidType(u8),

    /// Truncated NAL unit or length prefix.
    #[error("Truncated NAL unit: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}

/// Result type for EVC operations.
pub type Result<T> = std::result::Result<T, EvcError>;

impl EvcError {
    /// Create a malformed-bitstream error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        EvcError::MalformedBitstream(msg.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        EvcError::InvalidArgument(msg.into())
    }

    /// Create an unsupported-feature error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        EvcError::Unsupported(msg.into())
    }

    /// Create an unexpected-state error.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        EvcError::Unexpected(msg.into())
    }

    /// Get the numeric return code for this error.
    pub fn code(&self) -> i32 {
        match self {
            EvcError::Nal(_) | EvcError::MalformedBitstream(_) => codes::ERR_MALFORMED_BITSTREAM,
            EvcError::Core(transcode_core::Error::Bitstream(_)) => codes::ERR_MALFORMED_BITSTREAM,
            EvcError::Core(_) => codes::ERR,
            EvcError::InvalidArgument(_) => codes::ERR_INVALID_ARGUMENT,
            EvcError::Unsupported(_) => codes::ERR_UNSUPPORTED,
            EvcError::OutOfMemory(_) => codes::ERR_OUT_OF_MEMORY,
            EvcError::CapacityExceeded { .. } => codes::ERR_REACHED_MAX,
            EvcError::LeaseViolation(_) | EvcError::Unexpected(_) => codes::ERR_UNEXPECTED,
        }
    }

    /// Check whether the error came from the coded data rather than the caller.
    pub fn is_bitstream_error(&self) -> bool {
        self.code() == codes::ERR_MALFORMED_BITSTREAM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_core::BitstreamError;

    #[test]
    fn test_error_codes() {
        assert_eq!(EvcError::malformed("x").code(), -202);
        assert_eq!(EvcError::invalid("x").code(), -101);
        assert_eq!(EvcError::CapacityExceeded { capacity: 22 }.code(), -103);
        assert_eq!(EvcError::unexpected("x").code(), -105);
        assert_eq!(EvcError::Nal(NalError::ForbiddenBit).code(), -202);
    }

    #[test]
    fn test_core_truncation_is_bitstream_error() {
        let err: EvcError = transcode_core::Error::from(BitstreamError::UnexpectedEnd).into();
        assert!(err.is_bitstream_error());
        let err: EvcError = transcode_core::Error::invalid_param("p").into();
        assert!(!err.is_bitstream_error());
    }

    #[test]
    fn test_error_display() {
        let err = EvcError::CapacityExceeded { capacity: 8 };
        assert_eq!(err.to_string(), "Picture pool capacity of 8 exceeded");
        let err: EvcError = NalError::Truncated { expected: 10, got: 3 }.into();
        assert_eq!(
            err.to_string(),
            "NAL unit error: Truncated NAL unit: expected 10 bytes, got 3"
        );
    }
}
