//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// NaN has no canonical form.
    #[error("NaN values are forbidden")]
    NaNForbidden,

    /// Infinite floats have no canonical form either.
    #[error("infinite values are forbidden")]
    InfinityForbidden,

    /// Value nesting exceeds the encoder limit.
    #[error("value nesting exceeds {max} levels")]
    TooDeep {
        /// Maximum supported depth.
        max: usize,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }
}
