//! # Quasar Codec
//!
//! The opaque seam converting typed messages to and from bus payloads.
//! Services are generic over a [`Codec`]; the engine never inspects the
//! wire format. The subject is passed through so an implementation may
//! pick a format per subject.
//!
//! [`BincodeCodec`] is the default implementation.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from encode/decode operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoding a response failed.
    #[error("encode failed for {subject}: {source}")]
    Encode {
        subject: String,
        #[source]
        source: Box<bincode::ErrorKind>,
    },

    /// Decoding a request failed.
    #[error("decode failed for {subject}: {source}")]
    Decode {
        subject: String,
        #[source]
        source: Box<bincode::ErrorKind>,
    },
}

/// Converts typed messages to and from bytes.
pub trait Codec: Send + Sync {
    /// Encode a message for a subject.
    ///
    /// # Errors
    ///
    /// `CodecError::Encode` when serialization fails.
    fn encode<T: Serialize>(&self, subject: &str, message: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a payload received on a subject.
    ///
    /// # Errors
    ///
    /// `CodecError::Decode` when the payload does not parse as `T`.
    fn decode<T: DeserializeOwned>(&self, subject: &str, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Bincode-backed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, subject: &str, message: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(message).map_err(|source| CodecError::Encode {
            subject: subject.to_string(),
            source,
        })
    }

    fn decode<T: DeserializeOwned>(&self, subject: &str, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|source| CodecError::Decode {
            subject: subject.to_string(),
            source,
        })
    }
}
