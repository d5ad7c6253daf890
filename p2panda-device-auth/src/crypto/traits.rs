// SPDX-License-Identifier: MIT OR Apache-2.0

//! Traits for core cryptographic operations, random number generation and the platform key store.
//!
//! The authentication engine never touches long-term key material directly. Long-term keys live
//! behind a [`KeyAlias`] in a key store and are only ever used through the operations below.
use std::cmp::Ordering;
use std::error::Error;

use crate::crypto::aead::{AeadKey, AeadNonce};
use crate::crypto::hkdf::HMAC_SIZE;
use crate::crypto::ristretto::{POINT_SIZE, SCALAR_SIZE};
use crate::crypto::sha2::SHA256_DIGEST_SIZE;
use crate::key_alias::KeyAlias;

pub trait CryptoProvider {
    type Error: Error;

    fn sha256(&self, messages: &[&[u8]]) -> Result<[u8; SHA256_DIGEST_SIZE], Self::Error>;

    fn hmac(&self, key: &[u8], messages: &[&[u8]]) -> Result<[u8; HMAC_SIZE], Self::Error>;

    fn hkdf<const N: usize>(
        &self,
        salt: &[u8],
        ikm: &[u8],
        info: Option<&[u8]>,
    ) -> Result<[u8; N], Self::Error>;

    fn aead_encrypt(
        &self,
        key: &AeadKey,
        plaintext: &[u8],
        nonce: AeadNonce,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, Self::Error>;

    fn aead_decrypt(
        &self,
        key: &AeadKey,
        ciphertext_tag: &[u8],
        nonce: AeadNonce,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, Self::Error>;

    /// Verifies a signature created with a long-term identity key.
    fn verify(&self, public_key: &[u8], bytes: &[u8], signature: &[u8])
    -> Result<(), Self::Error>;

    /// Maps a secret onto a group element with unknown discrete logarithm.
    fn hash_to_point(&self, input: &[u8]) -> Result<[u8; POINT_SIZE], Self::Error>;

    fn is_valid_point(&self, point: &[u8]) -> bool;

    fn point_mul(
        &self,
        scalar: &[u8; SCALAR_SIZE],
        point: &[u8],
    ) -> Result<[u8; POINT_SIZE], Self::Error>;

    /// `base ^ exponent mod modulus` over unsigned big-endian numbers.
    fn big_num_exp_mod(
        &self,
        base: &[u8],
        exponent: &[u8],
        modulus: &[u8],
    ) -> Result<Vec<u8>, Self::Error>;

    fn big_num_compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

pub trait RandProvider {
    type Error: Error;

    fn random_array<const N: usize>(&self) -> Result<[u8; N], Self::Error>;

    fn random_vec(&self, len: usize) -> Result<Vec<u8>, Self::Error>;
}

/// Storage for long-term keys, addressed by alias.
///
/// Implementations are expected to be backed by a platform key store. Secret material never
/// leaves it, which is why signing, MAC computation and key agreement are operations of the store
/// itself.
pub trait KeyStore {
    type Error: Error;

    /// Generates a new long-term signing key pair, replacing any key under the same alias.
    fn generate_key_pair(&self, alias: &KeyAlias) -> Result<(), Self::Error>;

    fn import_public_key(&self, alias: &KeyAlias, public_key: &[u8]) -> Result<(), Self::Error>;

    /// Imports key material which can afterwards be used as a MAC key.
    fn import_symmetric_key(&self, alias: &KeyAlias, key: &[u8]) -> Result<(), Self::Error>;

    /// Exports the public part of a key pair or an imported public key.
    fn export_public_key(&self, alias: &KeyAlias) -> Result<Vec<u8>, Self::Error>;

    fn key_exists(&self, alias: &KeyAlias) -> Result<bool, Self::Error>;

    /// Removes the key. Deleting an alias which does not exist is not an error.
    fn delete_key(&self, alias: &KeyAlias) -> Result<(), Self::Error>;

    fn sign(&self, alias: &KeyAlias, bytes: &[u8]) -> Result<Vec<u8>, Self::Error>;

    fn hmac_with_alias(
        &self,
        alias: &KeyAlias,
        messages: &[&[u8]],
    ) -> Result<[u8; HMAC_SIZE], Self::Error>;

    /// Agrees on a shared secret between the own key pair and a stored peer public key and
    /// persists the result as a symmetric key under `shared_alias`.
    fn agree_key(
        &self,
        own_alias: &KeyAlias,
        peer_alias: &KeyAlias,
        shared_alias: &KeyAlias,
    ) -> Result<(), Self::Error>;
}

/// Everything the authentication engine needs from its environment.
pub trait Platform: CryptoProvider + RandProvider + KeyStore + Send + Sync {}

impl<T> Platform for T where T: CryptoProvider + RandProvider + KeyStore + Send + Sync {}
