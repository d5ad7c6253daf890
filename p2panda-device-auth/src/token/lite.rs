// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::{debug, trace};

use crate::crypto::Platform;
use crate::error::AuthError;
use crate::key_alias::KeyPurpose;
use crate::token::{TokenManager, TokenParams};

/// Token manager for symmetric credentials.
///
/// There is no long-term local identity to provision. The only per-peer material is the
/// authentication code imported during binding.
#[derive(Clone, Copy, Debug, Default)]
pub struct LiteTokenManager;

impl<P: Platform> TokenManager<P> for LiteTokenManager {
    fn register_local_identity(
        &self,
        _provider: &P,
        params: &TokenParams,
    ) -> Result<(), AuthError> {
        trace!(
            auth_id = hex::encode(&params.auth_id),
            "no local identity to register"
        );
        Ok(())
    }

    fn unregister_local_identity(
        &self,
        _provider: &P,
        _params: &TokenParams,
    ) -> Result<(), AuthError> {
        Ok(())
    }

    fn delete_peer_auth_info(&self, provider: &P, params: &TokenParams) -> Result<(), AuthError> {
        let alias = params.alias(KeyPurpose::AuthToken);
        provider.delete_key(&alias).map_err(AuthError::crypto)?;
        debug!(%alias, "deleted peer auth token");
        Ok(())
    }

    fn get_public_key(&self, _provider: &P, _params: &TokenParams) -> Result<Vec<u8>, AuthError> {
        Err(AuthError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::{KeyStore, Provider};
    use crate::error::AuthError;
    use crate::key_alias::KeyPurpose;
    use crate::token::{TokenManager, TokenParams};

    use super::LiteTokenManager;

    #[test]
    fn symmetric_lifecycle() {
        let provider = Provider::from_seed([1; 32]);
        let own = TokenParams::new("com.example", "lights", b"alice");
        let peer = own.with_auth_id(b"bob");

        LiteTokenManager
            .register_local_identity(&provider, &own)
            .unwrap();
        assert_eq!(provider.key_count(), 0);

        assert!(matches!(
            LiteTokenManager.get_public_key(&provider, &own),
            Err(AuthError::NotSupported)
        ));
        assert!(matches!(
            LiteTokenManager.compute_and_persist_psk(&provider, &own, b"bob", &[0; 32]),
            Err(AuthError::NotSupported)
        ));

        let alias = peer.alias(KeyPurpose::AuthToken);
        provider.import_symmetric_key(&alias, &[7; 32]).unwrap();
        LiteTokenManager
            .delete_peer_auth_info(&provider, &peer)
            .unwrap();
        assert!(!provider.key_exists(&alias).unwrap());
    }
}
