// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic handles into the key store.
//!
//! A key alias names one key for a (purpose, package, service, identity) tuple. The alias is a
//! hash over the tuple, so the key store never learns the identities in plain text and the same
//! alias can be re-derived at any time without persisting it.
use std::fmt;

use crate::crypto::sha2::sha2_256;

pub const KEY_ALIAS_SIZE: usize = 32;

/// What the key behind an alias is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Own long-term signing key pair.
    KeyPair,

    /// Long-term public key of a bound peer.
    PeerPublicKey,

    /// Pre-shared key agreed with a bound peer, used by the PAKE protocols.
    Psk,

    /// Symmetric authentication code shared with a bound peer, used by the ISO protocol.
    AuthToken,
}

impl KeyPurpose {
    fn tag(&self) -> &'static [u8] {
        match self {
            KeyPurpose::KeyPair => b"key-pair",
            KeyPurpose::PeerPublicKey => b"peer-public-key",
            KeyPurpose::Psk => b"psk",
            KeyPurpose::AuthToken => b"auth-token",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyAlias([u8; KEY_ALIAS_SIZE]);

impl KeyAlias {
    pub fn derive(
        purpose: KeyPurpose,
        package_name: &str,
        service_type: &str,
        auth_id: &[u8],
    ) -> Self {
        // Every part is length-prefixed, otherwise ("ab", "c") and ("a", "bc") would collide.
        let purpose_len = length_prefix(purpose.tag());
        let package_len = length_prefix(package_name.as_bytes());
        let service_len = length_prefix(service_type.as_bytes());
        let auth_id_len = length_prefix(auth_id);

        Self(sha2_256(&[
            &purpose_len,
            purpose.tag(),
            &package_len,
            package_name.as_bytes(),
            &service_len,
            service_type.as_bytes(),
            &auth_id_len,
            auth_id,
        ]))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_ALIAS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn length_prefix(bytes: &[u8]) -> [u8; 4] {
    (bytes.len() as u32).to_be_bytes()
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyAlias").field(&self.to_hex()).finish()
    }
}
