// SPDX-License-Identifier: MIT OR Apache-2.0

//! Containers for secret key material.
//!
//! Both containers wipe their memory when dropped, hide their contents in debug output and compare
//! in constant time. Ephemeral PAKE keys, pre-shared secrets and derived session keys never leave
//! these wrappers while a sub-task holds them.
use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed-size secret.
#[derive(Clone, Eq, ZeroizeOnDrop)]
pub struct Secret<const N: usize>([u8; N]);

impl<const N: usize> Secret<N> {
    pub(crate) fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&"***").finish()
    }
}

/// Variable-length secret, used where the size depends on the negotiated group (for example
/// discrete-log shared secrets) or on caller input (PINs).
#[derive(Clone, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.as_slice().ct_eq(other.0.as_slice()))
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretBytes").field(&"***").finish()
    }
}

/// Session key handed to the upper-layer secure channel after a successful handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(Secret<SESSION_KEY_SIZE>);

/// 256-bit session key size.
pub const SESSION_KEY_SIZE: usize = 32;

impl SessionKey {
    pub(crate) fn from_secret(secret: Secret<SESSION_KEY_SIZE>) -> Self {
        Self(secret)
    }

    /// Returns the raw key bytes.
    ///
    /// Callers are responsible for wiping any copy they make.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionKey").field(&"***").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Secret, SecretBytes};

    #[test]
    fn debug_hides_value() {
        let secret = Secret::from_bytes([7u8; 4]);
        assert_eq!(format!("{secret:?}"), "Secret(\"***\")");

        let secret = SecretBytes::from_slice(b"1234");
        assert!(!format!("{secret:?}").contains("1234"));
    }

    #[test]
    fn constant_time_equality() {
        assert_eq!(SecretBytes::from_slice(b"abc"), SecretBytes::from_slice(b"abc"));
        assert_ne!(SecretBytes::from_slice(b"abc"), SecretBytes::from_slice(b"abd"));
        assert_ne!(SecretBytes::from_slice(b"abc"), SecretBytes::from_slice(b"ab"));
        assert_eq!(Secret::from_bytes([1u8; 8]), Secret::from_bytes([1u8; 8]));
    }
}
