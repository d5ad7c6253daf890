// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lookup of known peer identities.
//!
//! The engine only reads from the identity store, to check that the identity a peer declares
//! during a handshake is one this device trusts for the requested service.
use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AuthError;

/// Role of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserType {
    Accessory,
    Controller,
    Bridge,
}

/// Identity record of a bound peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub auth_id: Vec<u8>,
    pub user_type: UserType,
}

pub trait IdentityStore {
    type Error: std::error::Error;

    fn lookup_peer(
        &self,
        service_type: &str,
        auth_id: &[u8],
    ) -> Result<Option<PeerRecord>, Self::Error>;
}

/// Object-safe view on an identity store, as used by running tasks.
pub(crate) trait PeerLookup {
    fn lookup_peer_record(
        &self,
        service_type: &str,
        auth_id: &[u8],
    ) -> Result<Option<PeerRecord>, AuthError>;
}

impl<S: IdentityStore> PeerLookup for S {
    fn lookup_peer_record(
        &self,
        service_type: &str,
        auth_id: &[u8],
    ) -> Result<Option<PeerRecord>, AuthError> {
        self.lookup_peer(service_type, auth_id)
            .map_err(|err| AuthError::IdentityStore(err.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    peers: RwLock<HashMap<(String, Vec<u8>), PeerRecord>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, service_type: &str, record: PeerRecord) -> Result<(), IdentityStoreError> {
        let mut peers = self
            .peers
            .write()
            .map_err(|_| IdentityStoreError::LockPoisoned)?;
        peers.insert((service_type.to_owned(), record.auth_id.clone()), record);
        Ok(())
    }

    pub fn remove(
        &self,
        service_type: &str,
        auth_id: &[u8],
    ) -> Result<Option<PeerRecord>, IdentityStoreError> {
        let mut peers = self
            .peers
            .write()
            .map_err(|_| IdentityStoreError::LockPoisoned)?;
        Ok(peers.remove(&(service_type.to_owned(), auth_id.to_vec())))
    }
}

impl IdentityStore for MemoryIdentityStore {
    type Error = IdentityStoreError;

    fn lookup_peer(
        &self,
        service_type: &str,
        auth_id: &[u8],
    ) -> Result<Option<PeerRecord>, Self::Error> {
        let peers = self
            .peers
            .read()
            .map_err(|_| IdentityStoreError::LockPoisoned)?;
        Ok(peers
            .get(&(service_type.to_owned(), auth_id.to_vec()))
            .cloned())
    }
}

#[derive(Debug, Error)]
pub enum IdentityStoreError {
    #[error("identity store lock is poisoned")]
    LockPoisoned,
}
