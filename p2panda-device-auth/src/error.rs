// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors of the authentication engine and their stable numeric codes.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cbor::{DecodeError, EncodeError};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Message is malformed or misses a required field.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("no common protocol version with peer")]
    UnsupportedVersion,

    #[error("no protocol supports the negotiated version and operation")]
    NotSupported,

    #[error("peer sent an invalid public key")]
    InvalidPublicKey,

    #[error("crypto provider failed: {0}")]
    Crypto(String),

    #[error("peer reported an error: {0}")]
    PeerReported(ErrorCode),

    #[error("task not found")]
    TaskNotFound,

    #[error("maximum number of live tasks reached")]
    AllocationFailed,

    #[error("no protocol could be selected for this request")]
    TaskCreationFailed,

    #[error("key confirmation from peer did not match")]
    ConfirmationMismatch,

    #[error("peer identity is not the expected one")]
    UnexpectedPeer,

    #[error("identity store failed: {0}")]
    IdentityStore(String),

    #[error("could not encode or decode message: {0}")]
    Codec(String),

    #[error("lock is poisoned")]
    LockPoisoned,
}

impl AuthError {
    /// Wraps any error reported by the crypto provider or key store.
    pub(crate) fn crypto(err: impl fmt::Display) -> Self {
        AuthError::Crypto(err.to_string())
    }

    /// Stable code of this error, as reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::InvalidInput(_) => ErrorCode::InvalidInput,
            AuthError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            AuthError::NotSupported => ErrorCode::NotSupported,
            AuthError::InvalidPublicKey => ErrorCode::InvalidPublicKey,
            AuthError::Crypto(_) => ErrorCode::CryptoFailure,
            AuthError::PeerReported(_) => ErrorCode::PeerReported,
            AuthError::TaskNotFound => ErrorCode::TaskNotFound,
            AuthError::AllocationFailed => ErrorCode::AllocationFailed,
            AuthError::TaskCreationFailed => ErrorCode::TaskCreationFailed,
            AuthError::ConfirmationMismatch => ErrorCode::ConfirmationMismatch,
            AuthError::UnexpectedPeer => ErrorCode::UnexpectedPeer,
            AuthError::IdentityStore(_) => ErrorCode::IdentityStore,
            AuthError::Codec(_) => ErrorCode::Codec,
            AuthError::LockPoisoned => ErrorCode::Internal,
        }
    }
}

impl From<EncodeError> for AuthError {
    fn from(value: EncodeError) -> Self {
        AuthError::Codec(value.to_string())
    }
}

impl From<DecodeError> for AuthError {
    fn from(value: DecodeError) -> Self {
        AuthError::Codec(value.to_string())
    }
}

/// Error code carried in error messages between peers.
///
/// Encoded as a plain integer. Codes unknown to this version are kept as `Other`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    InvalidInput,
    UnsupportedVersion,
    NotSupported,
    InvalidPublicKey,
    CryptoFailure,
    PeerReported,
    TaskNotFound,
    AllocationFailed,
    TaskCreationFailed,
    ConfirmationMismatch,
    UnexpectedPeer,
    IdentityStore,
    Codec,
    Internal,
    Other(u32),
}

impl From<u32> for ErrorCode {
    fn from(value: u32) -> Self {
        match value {
            1 => ErrorCode::InvalidInput,
            2 => ErrorCode::UnsupportedVersion,
            3 => ErrorCode::NotSupported,
            4 => ErrorCode::InvalidPublicKey,
            5 => ErrorCode::CryptoFailure,
            6 => ErrorCode::PeerReported,
            7 => ErrorCode::TaskNotFound,
            8 => ErrorCode::AllocationFailed,
            9 => ErrorCode::TaskCreationFailed,
            10 => ErrorCode::ConfirmationMismatch,
            11 => ErrorCode::UnexpectedPeer,
            12 => ErrorCode::IdentityStore,
            13 => ErrorCode::Codec,
            14 => ErrorCode::Internal,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(value: ErrorCode) -> Self {
        match value {
            ErrorCode::InvalidInput => 1,
            ErrorCode::UnsupportedVersion => 2,
            ErrorCode::NotSupported => 3,
            ErrorCode::InvalidPublicKey => 4,
            ErrorCode::CryptoFailure => 5,
            ErrorCode::PeerReported => 6,
            ErrorCode::TaskNotFound => 7,
            ErrorCode::AllocationFailed => 8,
            ErrorCode::TaskCreationFailed => 9,
            ErrorCode::ConfirmationMismatch => 10,
            ErrorCode::UnexpectedPeer => 11,
            ErrorCode::IdentityStore => 12,
            ErrorCode::Codec => 13,
            ErrorCode::Internal => 14,
            ErrorCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, u32::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthError, ErrorCode};

    #[test]
    fn codes_are_stable() {
        for code in 1..=14u32 {
            assert_eq!(u32::from(ErrorCode::from(code)), code);
            assert!(!matches!(ErrorCode::from(code), ErrorCode::Other(_)));
        }
        assert_eq!(ErrorCode::from(999), ErrorCode::Other(999));
        assert_eq!(u32::from(ErrorCode::Other(999)), 999);
    }

    #[test]
    fn error_to_code() {
        assert_eq!(AuthError::InvalidPublicKey.code(), ErrorCode::InvalidPublicKey);
        assert_eq!(
            AuthError::PeerReported(ErrorCode::Codec).code(),
            ErrorCode::PeerReported
        );
        assert_eq!(AuthError::crypto("boom").code(), ErrorCode::CryptoFailure);
    }
}
