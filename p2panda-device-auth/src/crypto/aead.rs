// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM authenticated symmetric encryption with additional data (AEAD) with 256-bit key,
//! 128-bit tag and 96-bit nonce.
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use thiserror::Error;

pub const AEAD_KEY_SIZE: usize = 32;

pub const AEAD_NONCE_SIZE: usize = 12;

pub const AEAD_TAG_SIZE: usize = 16;

pub type AeadNonce = [u8; AEAD_NONCE_SIZE];

pub type AeadKey = [u8; AEAD_KEY_SIZE];

/// Encrypts the plaintext and returns the ciphertext with the authentication tag attached to the
/// end.
pub fn aead_encrypt(
    key: &AeadKey,
    plaintext: &[u8],
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AeadError::InvalidKey)?;
    let payload = Payload {
        msg: plaintext,
        aad: aad.unwrap_or_default(),
    };
    cipher
        .encrypt(Nonce::from_slice(&nonce), payload)
        .map_err(|_| AeadError::Encrypt)
}

pub fn aead_decrypt(
    key: &AeadKey,
    ciphertext_tag: &[u8],
    nonce: AeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, AeadError> {
    if ciphertext_tag.len() < AEAD_TAG_SIZE {
        return Err(AeadError::CiphertextTooShort);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AeadError::InvalidKey)?;
    let payload = Payload {
        msg: ciphertext_tag,
        aad: aad.unwrap_or_default(),
    };
    cipher
        .decrypt(Nonce::from_slice(&nonce), payload)
        .map_err(|_| AeadError::Decrypt)
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("invalid aead key")]
    InvalidKey,

    #[error("ciphertext is shorter than the authentication tag")]
    CiphertextTooShort,

    #[error("could not encrypt with aead")]
    Encrypt,

    #[error("could not decrypt with aead")]
    Decrypt,
}
