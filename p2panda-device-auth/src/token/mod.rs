// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle of long-term identities and the per-peer material derived from them.
//!
//! Every protocol is bound to one token manager. The PAKE protocols use the [standard] manager
//! with an asymmetric identity key pair, the ISO protocol uses the [lite] manager which only deals
//! with symmetric authentication codes.
//!
//! [standard]: StandardTokenManager
//! [lite]: LiteTokenManager
mod lite;
mod standard;

pub use lite::LiteTokenManager;
pub use standard::StandardTokenManager;

use crate::error::AuthError;
use crate::key_alias::{KeyAlias, KeyPurpose};

/// Identifies whose material a token operation is about.
///
/// For own identities `auth_id` is the local identity, for peer operations it is the peer's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenParams {
    pub package_name: String,
    pub service_type: String,
    pub auth_id: Vec<u8>,
}

impl TokenParams {
    pub fn new(package_name: &str, service_type: &str, auth_id: &[u8]) -> Self {
        Self {
            package_name: package_name.to_owned(),
            service_type: service_type.to_owned(),
            auth_id: auth_id.to_vec(),
        }
    }

    /// Same package and service, but a different identity.
    pub fn with_auth_id(&self, auth_id: &[u8]) -> Self {
        Self {
            package_name: self.package_name.clone(),
            service_type: self.service_type.clone(),
            auth_id: auth_id.to_vec(),
        }
    }

    pub fn alias(&self, purpose: KeyPurpose) -> KeyAlias {
        KeyAlias::derive(
            purpose,
            &self.package_name,
            &self.service_type,
            &self.auth_id,
        )
    }
}

pub trait TokenManager<P>: Send + Sync {
    /// Provisions the long-term local identity. Calling it again for an existing identity keeps
    /// the existing key.
    fn register_local_identity(&self, provider: &P, params: &TokenParams)
    -> Result<(), AuthError>;

    fn unregister_local_identity(
        &self,
        provider: &P,
        params: &TokenParams,
    ) -> Result<(), AuthError>;

    /// Removes everything stored for the peer named in `params`.
    fn delete_peer_auth_info(&self, provider: &P, params: &TokenParams) -> Result<(), AuthError>;

    fn get_public_key(&self, provider: &P, params: &TokenParams) -> Result<Vec<u8>, AuthError>;

    /// Derives the pairwise pre-shared key with a peer from both long-term identities and
    /// persists it for later authentication.
    fn compute_and_persist_psk(
        &self,
        _provider: &P,
        _params: &TokenParams,
        _peer_auth_id: &[u8],
        _peer_public_key: &[u8],
    ) -> Result<(), AuthError> {
        Err(AuthError::NotSupported)
    }
}
