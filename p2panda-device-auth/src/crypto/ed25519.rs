// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term device identity keys.
//!
//! A device identity is a single Ed25519 key pair. It signs the identity information exchanged
//! during binding and, converted to its Montgomery form, takes part in an X25519 agreement with
//! the peer's identity key to derive the pairwise pre-shared key used for later authentication.
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::sha2::sha2_512;
use crate::secret::Secret;

pub const SECRET_KEY_SIZE: usize = 32;

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const SIGNATURE_SIZE: usize = 64;

pub const SHARED_SECRET_SIZE: usize = 32;

/// Secret half of a device identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentitySecret(Secret<SECRET_KEY_SIZE>);

impl IdentitySecret {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing_key().verifying_key().to_bytes()
    }

    pub fn sign(&self, bytes: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key().sign(bytes).to_bytes()
    }

    /// X25519 agreement between this identity and the peer's Ed25519 public key.
    pub fn agree(
        &self,
        their_public_key: &[u8],
    ) -> Result<Secret<SHARED_SECRET_SIZE>, Ed25519Error> {
        let their_key = verifying_key(their_public_key)?;
        let their_montgomery = CompressedEdwardsY(their_key.to_bytes())
            .decompress()
            .ok_or(Ed25519Error::InvalidPublicKey)?
            .to_montgomery();
        let their_montgomery = X25519PublicKey::from(their_montgomery.to_bytes());

        // The Ed25519 secret scalar is the lower half of the expanded secret key, X25519 applies
        // the same clamping to it.
        let mut expanded = sha2_512(&[self.0.as_bytes()]);
        let mut scalar_bytes = [0u8; 32];
        scalar_bytes.copy_from_slice(&expanded[..32]);
        expanded.zeroize();
        let our_secret = StaticSecret::from(scalar_bytes);
        scalar_bytes.zeroize();

        let shared = our_secret.diffie_hellman(&their_montgomery);
        if !shared.was_contributory() {
            return Err(Ed25519Error::NonContributory);
        }
        Ok(Secret::from_bytes(shared.to_bytes()))
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(self.0.as_bytes())
    }
}

/// Verifies an Ed25519 signature made by the given public key.
pub fn verify(public_key: &[u8], bytes: &[u8], signature: &[u8]) -> Result<(), Ed25519Error> {
    let key = verifying_key(public_key)?;
    let signature =
        DalekSignature::from_slice(signature).map_err(|_| Ed25519Error::InvalidSignature)?;
    key.verify(bytes, &signature)
        .map_err(|_| Ed25519Error::VerificationFailed)
}

fn verifying_key(bytes: &[u8]) -> Result<VerifyingKey, Ed25519Error> {
    let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| Ed25519Error::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| Ed25519Error::InvalidPublicKey)
}

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("invalid ed25519 public key")]
    InvalidPublicKey,

    #[error("invalid ed25519 signature encoding")]
    InvalidSignature,

    #[error("signature does not match public key and bytes")]
    VerificationFailed,

    #[error("key agreement resulted in a low-order shared secret")]
    NonContributory,
}
