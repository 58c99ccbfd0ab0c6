//! Codec errors
//!
//! Both variants are structural from the runtime's point of view: a payload
//! that fails to encode or decode is logged and dropped, never retried.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Envelope could not be serialized
    #[error("Encode failed for method '{method}': {reason}")]
    Encode { method: String, reason: String },

    /// Payload is not a well-formed envelope
    #[error("Decode failed ({size} bytes): {reason}")]
    Decode { size: usize, reason: String },

    /// Encoded envelope exceeds the configured limit
    #[error("Envelope too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

impl CodecError {
    pub fn encode(method: impl Into<String>, reason: impl ToString) -> Self {
        Self::Encode {
            method: method.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(size: usize, reason: impl ToString) -> Self {
        Self::Decode {
            size,
            reason: reason.to_string(),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Encode { .. } | Self::TooLarge { .. } => "encode",
            Self::Decode { .. } => "decode",
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
