// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::debug;

use crate::crypto::Platform;
use crate::error::AuthError;
use crate::key_alias::KeyPurpose;
use crate::token::{TokenManager, TokenParams};

/// Token manager for asymmetric long-term identities.
///
/// The local identity is an Ed25519 key pair held by the key store. After binding, the peer's
/// public key is stored next to it and both are agreed into a pre-shared key.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardTokenManager;

impl<P: Platform> TokenManager<P> for StandardTokenManager {
    fn register_local_identity(
        &self,
        provider: &P,
        params: &TokenParams,
    ) -> Result<(), AuthError> {
        let alias = params.alias(KeyPurpose::KeyPair);
        if provider.key_exists(&alias).map_err(AuthError::crypto)? {
            return Ok(());
        }
        provider
            .generate_key_pair(&alias)
            .map_err(AuthError::crypto)?;
        debug!(%alias, "registered local identity");
        Ok(())
    }

    fn unregister_local_identity(
        &self,
        provider: &P,
        params: &TokenParams,
    ) -> Result<(), AuthError> {
        let alias = params.alias(KeyPurpose::KeyPair);
        provider.delete_key(&alias).map_err(AuthError::crypto)?;
        debug!(%alias, "unregistered local identity");
        Ok(())
    }

    fn delete_peer_auth_info(&self, provider: &P, params: &TokenParams) -> Result<(), AuthError> {
        // Try both, report the first failure.
        let public_key = provider.delete_key(&params.alias(KeyPurpose::PeerPublicKey));
        let psk = provider.delete_key(&params.alias(KeyPurpose::Psk));
        public_key.map_err(AuthError::crypto)?;
        psk.map_err(AuthError::crypto)?;
        debug!(peer = hex::encode(&params.auth_id), "deleted peer public key and psk");
        Ok(())
    }

    fn get_public_key(&self, provider: &P, params: &TokenParams) -> Result<Vec<u8>, AuthError> {
        provider
            .export_public_key(&params.alias(KeyPurpose::KeyPair))
            .map_err(AuthError::crypto)
    }

    fn compute_and_persist_psk(
        &self,
        provider: &P,
        params: &TokenParams,
        peer_auth_id: &[u8],
        peer_public_key: &[u8],
    ) -> Result<(), AuthError> {
        let peer = params.with_auth_id(peer_auth_id);
        let own_alias = params.alias(KeyPurpose::KeyPair);
        let peer_alias = peer.alias(KeyPurpose::PeerPublicKey);
        let psk_alias = peer.alias(KeyPurpose::Psk);

        provider
            .import_public_key(&peer_alias, peer_public_key)
            .map_err(AuthError::crypto)?;
        provider
            .agree_key(&own_alias, &peer_alias, &psk_alias)
            .map_err(AuthError::crypto)?;
        debug!(%psk_alias, "persisted pre-shared key");
        Ok(())
    }
}
