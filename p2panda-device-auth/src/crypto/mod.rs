// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives required for device authentication and a default software provider
//! implementing all of them, including an in-memory key store.
pub mod aead;
pub mod ed25519;
pub mod hkdf;
pub mod modp;
mod provider;
pub mod ristretto;
pub mod sha2;
mod traits;

pub use provider::{CryptoError, KeyStoreError, Provider, RandError};
pub use traits::{CryptoProvider, KeyStore, Platform, RandProvider};
