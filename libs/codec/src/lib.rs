//! # Hive Codec - Envelope Encoding
//!
//! The cluster layer never looks inside an envelope's payload; it hands whole
//! envelopes to an [`EnvelopeCodec`] on the way out and gets them back on the
//! way in. Typed argument decoding happens later, at the handler, through
//! `hive_types::FromArgs`.
//!
//! [`BincodeCodec`] is the implementation every process uses by default.

pub mod error;

pub use error::{CodecError, Result};

use bytes::Bytes;
use hive_types::Envelope;

/// Default upper bound for one encoded envelope.
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 4 * 1024 * 1024;

/// Whole-envelope wire encoding.
pub trait EnvelopeCodec: Send + Sync + 'static {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes>;

    fn decode(&self, payload: &[u8]) -> Result<Envelope>;
}

/// bincode encoding of [`Envelope`] with a size cap on both directions.
#[derive(Debug, Clone)]
pub struct BincodeCodec {
    max_size: usize,
}

impl BincodeCodec {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_ENVELOPE_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for BincodeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec for BincodeCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        let buf = bincode::serialize(envelope)
            .map_err(|e| CodecError::encode(envelope.method.clone(), e))?;
        if buf.len() > self.max_size {
            return Err(CodecError::TooLarge {
                size: buf.len(),
                max: self.max_size,
            });
        }
        Ok(Bytes::from(buf))
    }

    fn decode(&self, payload: &[u8]) -> Result<Envelope> {
        if payload.len() > self.max_size {
            return Err(CodecError::TooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }
        bincode::deserialize(payload).map_err(|e| {
            tracing::debug!(size = payload.len(), error = %e, "Malformed envelope");
            CodecError::decode(payload.len(), e)
        })
    }
}
