// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default [`CryptoProvider`] for devices without a hardware-backed key store.
//!
//! Randomness comes from a ChaCha20 stream seeded by the operating system. Keys live in memory,
//! addressed by their [`KeyAlias`]. PAKE arithmetic runs over Ristretto255 or the RFC 3526 MODP
//! groups, long-term identities are Ed25519 key pairs and sealing uses AES-256-GCM with keys
//! expanded by HKDF-SHA256.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;
use tracing::trace;

use crate::crypto::aead::{AeadKey, AeadNonce};
use crate::crypto::ed25519::IdentitySecret;
use crate::crypto::hkdf::HMAC_SIZE;
use crate::crypto::ristretto::{POINT_SIZE, SCALAR_SIZE};
use crate::crypto::sha2::SHA256_DIGEST_SIZE;
use crate::crypto::traits::{CryptoProvider, KeyStore, RandProvider};
use crate::crypto::{aead, ed25519, hkdf, modp, ristretto, sha2};
use crate::key_alias::KeyAlias;
use crate::secret::SecretBytes;

/// Key material held by the in-memory key store.
#[derive(Debug)]
enum StoredKey {
    KeyPair(IdentitySecret),
    PublicKey(Vec<u8>),
    Symmetric(SecretBytes),
}

#[derive(Debug)]
pub struct Provider {
    rng: RwLock<rand_chacha::ChaCha20Rng>,
    keys: RwLock<HashMap<KeyAlias, StoredKey>>,
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            rng: RwLock::new(rand_chacha::ChaCha20Rng::from_os_rng()),
            keys: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl Provider {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: RwLock::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently held by the store.
    pub fn key_count(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or_default()
    }
}

impl CryptoProvider for Provider {
    type Error = CryptoError;

    fn sha256(&self, messages: &[&[u8]]) -> Result<[u8; SHA256_DIGEST_SIZE], Self::Error> {
        Ok(sha2::sha2_256(messages))
    }

    fn hmac(&self, key: &[u8], messages: &[&[u8]]) -> Result<[u8; HMAC_SIZE], Self::Error> {
        let tag = hkdf::hmac_sha256(key, messages)?;
        Ok(tag)
    }

    fn hkdf<const N: usize>(
        &self,
        salt: &[u8],
        ikm: &[u8],
        info: Option<&[u8]>,
    ) -> Result<[u8; N], Self::Error> {
        let key_material = hkdf::hkdf(salt, ikm, info)?;
        Ok(key_material)
    }

    fn aead_encrypt(
        &self,
        key: &AeadKey,
        plaintext: &[u8],
        nonce: AeadNonce,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, Self::Error> {
        let ciphertext_tag = aead::aead_encrypt(key, plaintext, nonce, aad)?;
        Ok(ciphertext_tag)
    }

    fn aead_decrypt(
        &self,
        key: &AeadKey,
        ciphertext_tag: &[u8],
        nonce: AeadNonce,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, Self::Error> {
        let plaintext = aead::aead_decrypt(key, ciphertext_tag, nonce, aad)?;
        Ok(plaintext)
    }

    fn verify(
        &self,
        public_key: &[u8],
        bytes: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        ed25519::verify(public_key, bytes, signature)?;
        Ok(())
    }

    fn hash_to_point(&self, input: &[u8]) -> Result<[u8; POINT_SIZE], Self::Error> {
        let point = ristretto::hash_to_point(input)?;
        Ok(point)
    }

    fn is_valid_point(&self, point: &[u8]) -> bool {
        ristretto::is_valid_point(point)
    }

    fn point_mul(
        &self,
        scalar: &[u8; SCALAR_SIZE],
        point: &[u8],
    ) -> Result<[u8; POINT_SIZE], Self::Error> {
        let point = ristretto::point_mul(scalar, point)?;
        Ok(point)
    }

    fn big_num_exp_mod(
        &self,
        base: &[u8],
        exponent: &[u8],
        modulus: &[u8],
    ) -> Result<Vec<u8>, Self::Error> {
        let result = modp::exp_mod(base, exponent, modulus)?;
        Ok(result)
    }

    fn big_num_compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        modp::compare(a, b)
    }
}

impl Provider {
    fn fill(&self, out: &mut [u8]) -> Result<(), RandError> {
        self.rng
            .write()
            .map_err(|_| RandError::LockPoisoned)?
            .try_fill_bytes(out)
            .map_err(|_| RandError::NotEnoughRandomness)
    }
}

impl RandProvider for Provider {
    type Error = RandError;

    fn random_array<const N: usize>(&self) -> Result<[u8; N], Self::Error> {
        let mut out = [0u8; N];
        self.fill(&mut out)?;
        Ok(out)
    }

    fn random_vec(&self, len: usize) -> Result<Vec<u8>, Self::Error> {
        let mut out = vec![0u8; len];
        self.fill(&mut out)?;
        Ok(out)
    }
}

impl KeyStore for Provider {
    type Error = KeyStoreError;

    fn generate_key_pair(&self, alias: &KeyAlias) -> Result<(), Self::Error> {
        let secret = IdentitySecret::from_bytes(self.random_array()?);
        self.insert(alias, StoredKey::KeyPair(secret))
    }

    fn import_public_key(&self, alias: &KeyAlias, public_key: &[u8]) -> Result<(), Self::Error> {
        if public_key.len() != ed25519::PUBLIC_KEY_SIZE {
            return Err(KeyStoreError::InvalidKeyMaterial(*alias));
        }
        self.insert(alias, StoredKey::PublicKey(public_key.to_vec()))
    }

    fn import_symmetric_key(&self, alias: &KeyAlias, key: &[u8]) -> Result<(), Self::Error> {
        if key.is_empty() {
            return Err(KeyStoreError::InvalidKeyMaterial(*alias));
        }
        self.insert(alias, StoredKey::Symmetric(SecretBytes::from_slice(key)))
    }

    fn export_public_key(&self, alias: &KeyAlias) -> Result<Vec<u8>, Self::Error> {
        let keys = self.keys.read().map_err(|_| KeyStoreError::LockPoisoned)?;
        match keys.get(alias) {
            Some(StoredKey::KeyPair(secret)) => Ok(secret.public_key().to_vec()),
            Some(StoredKey::PublicKey(public_key)) => Ok(public_key.clone()),
            Some(StoredKey::Symmetric(_)) => Err(KeyStoreError::WrongKeyType(*alias)),
            None => Err(KeyStoreError::KeyNotFound(*alias)),
        }
    }

    fn key_exists(&self, alias: &KeyAlias) -> Result<bool, Self::Error> {
        let keys = self.keys.read().map_err(|_| KeyStoreError::LockPoisoned)?;
        Ok(keys.contains_key(alias))
    }

    fn delete_key(&self, alias: &KeyAlias) -> Result<(), Self::Error> {
        let mut keys = self.keys.write().map_err(|_| KeyStoreError::LockPoisoned)?;
        if keys.remove(alias).is_some() {
            trace!(%alias, "deleted key");
        }
        Ok(())
    }

    fn sign(&self, alias: &KeyAlias, bytes: &[u8]) -> Result<Vec<u8>, Self::Error> {
        let keys = self.keys.read().map_err(|_| KeyStoreError::LockPoisoned)?;
        match keys.get(alias) {
            Some(StoredKey::KeyPair(secret)) => Ok(secret.sign(bytes).to_vec()),
            Some(_) => Err(KeyStoreError::WrongKeyType(*alias)),
            None => Err(KeyStoreError::KeyNotFound(*alias)),
        }
    }

    fn hmac_with_alias(
        &self,
        alias: &KeyAlias,
        messages: &[&[u8]],
    ) -> Result<[u8; HMAC_SIZE], Self::Error> {
        let keys = self.keys.read().map_err(|_| KeyStoreError::LockPoisoned)?;
        match keys.get(alias) {
            Some(StoredKey::Symmetric(key)) => {
                let tag = hkdf::hmac_sha256(key.as_bytes(), messages).map_err(CryptoError::from)?;
                Ok(tag)
            }
            Some(_) => Err(KeyStoreError::WrongKeyType(*alias)),
            None => Err(KeyStoreError::KeyNotFound(*alias)),
        }
    }

    fn agree_key(
        &self,
        own_alias: &KeyAlias,
        peer_alias: &KeyAlias,
        shared_alias: &KeyAlias,
    ) -> Result<(), Self::Error> {
        let shared = {
            let keys = self.keys.read().map_err(|_| KeyStoreError::LockPoisoned)?;
            let own = match keys.get(own_alias) {
                Some(StoredKey::KeyPair(secret)) => secret,
                Some(_) => return Err(KeyStoreError::WrongKeyType(*own_alias)),
                None => return Err(KeyStoreError::KeyNotFound(*own_alias)),
            };
            let peer = match keys.get(peer_alias) {
                Some(StoredKey::PublicKey(public_key)) => public_key,
                Some(_) => return Err(KeyStoreError::WrongKeyType(*peer_alias)),
                None => return Err(KeyStoreError::KeyNotFound(*peer_alias)),
            };
            own.agree(peer).map_err(CryptoError::from)?
        };
        self.insert(
            shared_alias,
            StoredKey::Symmetric(SecretBytes::from_slice(shared.as_bytes())),
        )
    }
}

impl Provider {
    fn insert(&self, alias: &KeyAlias, key: StoredKey) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.write().map_err(|_| KeyStoreError::LockPoisoned)?;
        keys.insert(*alias, key);
        trace!(%alias, "stored key");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Aead(#[from] aead::AeadError),

    #[error(transparent)]
    Hkdf(#[from] hkdf::HkdfError),

    #[error(transparent)]
    Ristretto(#[from] ristretto::RistrettoError),

    #[error(transparent)]
    Modp(#[from] modp::ModpError),

    #[error(transparent)]
    Ed25519(#[from] ed25519::Ed25519Error),
}

#[derive(Debug, Error)]
pub enum RandError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store lock is poisoned")]
    LockPoisoned,

    #[error("no key stored under alias {0}")]
    KeyNotFound(KeyAlias),

    #[error("key stored under alias {0} can not be used for this operation")]
    WrongKeyType(KeyAlias),

    #[error("invalid key material for alias {0}")]
    InvalidKeyMaterial(KeyAlias),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Rand(#[from] RandError),
}

#[cfg(test)]
mod tests {
    use crate::crypto::traits::{KeyStore, RandProvider};
    use crate::key_alias::{KeyAlias, KeyPurpose};

    use super::{KeyStoreError, Provider};

    fn alias(purpose: KeyPurpose, auth_id: &[u8]) -> KeyAlias {
        KeyAlias::derive(purpose, "com.example.app", "service", auth_id)
    }

    #[test]
    fn seeded_devices_repeat_randomness() {
        let device = Provider::from_seed([1; 32]);
        let same_device = Provider::from_seed([1; 32]);
        let other_device = Provider::from_seed([2; 32]);

        let salt = device.random_vec(16).unwrap();
        assert_eq!(same_device.random_array::<16>().unwrap().to_vec(), salt);
        assert_ne!(other_device.random_vec(16).unwrap(), salt);

        // Every draw advances the stream.
        assert_ne!(device.random_vec(16).unwrap(), salt);
    }

    #[test]
    fn key_pair_lifecycle() {
        let store = Provider::from_seed([1; 32]);
        let key_pair = alias(KeyPurpose::KeyPair, b"alice");

        assert!(!store.key_exists(&key_pair).unwrap());
        store.generate_key_pair(&key_pair).unwrap();
        assert!(store.key_exists(&key_pair).unwrap());

        let public_key = store.export_public_key(&key_pair).unwrap();
        let signature = store.sign(&key_pair, b"hello").unwrap();
        assert!(crate::crypto::ed25519::verify(&public_key, b"hello", &signature).is_ok());

        store.delete_key(&key_pair).unwrap();
        assert!(!store.key_exists(&key_pair).unwrap());

        // Deleting twice is fine.
        store.delete_key(&key_pair).unwrap();

        assert!(matches!(
            store.sign(&key_pair, b"hello"),
            Err(KeyStoreError::KeyNotFound(_))
        ));
    }

    #[test]
    fn agreed_keys_match() {
        let alice = Provider::from_seed([1; 32]);
        let bob = Provider::from_seed([2; 32]);

        let alice_key_pair = alias(KeyPurpose::KeyPair, b"alice");
        let bob_key_pair = alias(KeyPurpose::KeyPair, b"bob");
        alice.generate_key_pair(&alice_key_pair).unwrap();
        bob.generate_key_pair(&bob_key_pair).unwrap();

        let bob_on_alice = alias(KeyPurpose::PeerPublicKey, b"bob");
        let alice_on_bob = alias(KeyPurpose::PeerPublicKey, b"alice");
        alice
            .import_public_key(&bob_on_alice, &bob.export_public_key(&bob_key_pair).unwrap())
            .unwrap();
        bob.import_public_key(&alice_on_bob, &alice.export_public_key(&alice_key_pair).unwrap())
            .unwrap();

        let alice_psk = alias(KeyPurpose::Psk, b"bob");
        let bob_psk = alias(KeyPurpose::Psk, b"alice");
        alice
            .agree_key(&alice_key_pair, &bob_on_alice, &alice_psk)
            .unwrap();
        bob.agree_key(&bob_key_pair, &alice_on_bob, &bob_psk).unwrap();

        assert_eq!(
            alice.hmac_with_alias(&alice_psk, &[b"salt"]).unwrap(),
            bob.hmac_with_alias(&bob_psk, &[b"salt"]).unwrap()
        );

        // Symmetric keys can not be used for signing.
        assert!(matches!(
            alice.sign(&alice_psk, b"hello"),
            Err(KeyStoreError::WrongKeyType(_))
        ));
    }
}
