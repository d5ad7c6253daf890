// SPDX-License-Identifier: MIT OR Apache-2.0

//! Requests issued by the caller to start an authentication task.
use std::fmt;

use crate::identity::UserType;
use crate::message::OpCode;
use crate::secret::SecretBytes;
use crate::token::TokenParams;

/// Side of the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Sends the first message.
    Client,

    /// Answers the client's first message.
    Server,
}

/// Everything a task needs to know about the local device and the peer it expects.
#[derive(Clone)]
pub struct AuthRequest {
    pub op_code: OpCode,
    pub os_account_id: i32,
    pub package_name: String,
    pub service_type: String,
    pub self_auth_id: Vec<u8>,
    pub self_user_type: UserType,

    /// Identity of the peer, if known in advance. When set, a peer declaring any other identity
    /// is rejected.
    pub peer_auth_id: Option<Vec<u8>>,

    /// PIN shared out-of-band, required for binding.
    pub pin: Option<String>,

    /// Allow binding with the symmetric ISO protocol.
    pub iso_bind_compatible: bool,
}

impl AuthRequest {
    pub fn new(op_code: OpCode, package_name: &str, service_type: &str, self_auth_id: &[u8]) -> Self {
        Self {
            op_code,
            os_account_id: 0,
            package_name: package_name.to_owned(),
            service_type: service_type.to_owned(),
            self_auth_id: self_auth_id.to_vec(),
            self_user_type: UserType::Controller,
            peer_auth_id: None,
            pin: None,
            iso_bind_compatible: false,
        }
    }

    pub fn with_pin(mut self, pin: &str) -> Self {
        self.pin = Some(pin.to_owned());
        self
    }

    pub fn with_peer(mut self, peer_auth_id: &[u8]) -> Self {
        self.peer_auth_id = Some(peer_auth_id.to_vec());
        self
    }

    pub fn with_user_type(mut self, user_type: UserType) -> Self {
        self.self_user_type = user_type;
        self
    }

    pub fn with_os_account_id(mut self, os_account_id: i32) -> Self {
        self.os_account_id = os_account_id;
        self
    }

    pub fn iso_bind_compatible(mut self) -> Self {
        self.iso_bind_compatible = true;
        self
    }
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("op_code", &self.op_code)
            .field("os_account_id", &self.os_account_id)
            .field("package_name", &self.package_name)
            .field("service_type", &self.service_type)
            .field("self_auth_id", &hex::encode(&self.self_auth_id))
            .field("self_user_type", &self.self_user_type)
            .field("peer_auth_id", &self.peer_auth_id.as_ref().map(hex::encode))
            .field("pin", &self.pin.as_ref().map(|_| "***"))
            .field("iso_bind_compatible", &self.iso_bind_compatible)
            .finish()
    }
}

/// Request as held by a running task, with the PIN moved into a zeroizing container.
#[derive(Debug)]
pub(crate) struct AuthParams {
    pub role: Role,
    pub op_code: OpCode,
    pub os_account_id: i32,
    pub package_name: String,
    pub service_type: String,
    pub self_auth_id: Vec<u8>,
    pub self_user_type: UserType,
    pub peer_auth_id: Option<Vec<u8>>,
    pub pin: Option<SecretBytes>,
    pub iso_bind_compatible: bool,
}

impl AuthParams {
    pub fn new(role: Role, request: AuthRequest) -> Self {
        Self {
            role,
            op_code: request.op_code,
            os_account_id: request.os_account_id,
            package_name: request.package_name,
            service_type: request.service_type,
            self_auth_id: request.self_auth_id,
            self_user_type: request.self_user_type,
            peer_auth_id: request.peer_auth_id,
            pin: request.pin.map(|pin| SecretBytes::from_vec(pin.into_bytes())),
            iso_bind_compatible: request.iso_bind_compatible,
        }
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    /// Token parameters for the local identity.
    pub fn own_token_params(&self) -> TokenParams {
        TokenParams::new(&self.package_name, &self.service_type, &self.self_auth_id)
    }

    /// Token parameters for a peer identity.
    pub fn peer_token_params(&self, peer_auth_id: &[u8]) -> TokenParams {
        TokenParams::new(&self.package_name, &self.service_type, peer_auth_id)
    }
}
