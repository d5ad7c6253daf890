// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encoding of peer messages and sealed payloads in [CBOR] format.
//!
//! Input comes from an untrusted peer, so decoding is bounded in size and has to consume every
//! byte it is given.
//!
//! [CBOR]: https://cbor.io/
use ciborium::de::Error as DeserializeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest encoded value accepted from a peer. The biggest legitimate message is a candidate
/// offer carrying a 3072-bit public key, far below this.
pub const MAX_ENCODED_SIZE: usize = 64 * 1024;

pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|err| EncodeError(err.to_string()))?;
    Ok(bytes)
}

pub fn decode_cbor<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T, DecodeError> {
    if bytes.len() > MAX_ENCODED_SIZE {
        return Err(DecodeError::TooLarge(bytes.len()));
    }

    let mut reader = bytes;
    let value = ciborium::from_reader(&mut reader).map_err(DecodeError::from)?;
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.len()));
    }
    Ok(value)
}

#[derive(Debug, Error)]
#[error("value can not be serialized: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("encoded value of {0} bytes exceeds the size limit")]
    TooLarge(usize),

    #[error("{0} bytes left after decoding value")]
    TrailingBytes(usize),

    #[error("invalid cbor at position {0}")]
    Syntax(usize),

    /// Bytes were valid CBOR but did not describe the expected value.
    #[error("unexpected value: {0}")]
    Semantic(String),
}

impl From<DeserializeError<std::io::Error>> for DecodeError {
    fn from(value: DeserializeError<std::io::Error>) -> Self {
        match value {
            // Reading from a slice only fails when it ends early.
            DeserializeError::Io(err) => DecodeError::Semantic(err.to_string()),
            DeserializeError::Syntax(offset) => DecodeError::Syntax(offset),
            DeserializeError::Semantic(_, description) => DecodeError::Semantic(description),
            DeserializeError::RecursionLimitExceeded => {
                DecodeError::Semantic("recursion limit exceeded".into())
            }
        }
    }
}
