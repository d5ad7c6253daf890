// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messages exchanged between two peers running an authentication task.
//!
//! Every message names the operation it belongs to and carries the sender's minimum and current
//! protocol version, so both sides can detect a diverging negotiation at any point. The client's
//! first message bundles the first message of every protocol it offers, all later messages
//! belong to exactly one protocol.
use serde::{Deserialize, Serialize};

use crate::cbor::{decode_cbor, encode_cbor};
use crate::error::{AuthError, ErrorCode};
use crate::protocol::ProtocolType;
use crate::protocol::iso::IsoMessage;
use crate::protocol::pake::v1::PakeV1Message;
use crate::protocol::pake::v2::PakeV2Message;
use crate::version::Version;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    /// Pair two devices with a PIN and persist credentials for later authentication.
    Bind,

    /// Authenticate a bound peer and remove all credentials shared with it afterwards.
    Unbind,

    /// Authenticate a bound peer.
    Authenticate,
}

/// Minimum and current version of the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionExchange {
    pub min: Version,
    pub cur: Version,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub op_code: OpCode,
    pub version: Option<VersionExchange>,
    pub body: MessageBody,
}

impl PeerMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, AuthError> {
        Ok(encode_cbor(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthError> {
        Ok(decode_cbor(bytes)?)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, MessageBody::Error(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// First message of every protocol the client offers.
    Candidates(Vec<ProtocolMessage>),

    Protocol(ProtocolMessage),

    /// The sender aborted the task.
    Error(ErrorCode),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    Iso(IsoMessage),
    PakeV1(PakeV1Message),
    PakeV2(PakeV2Message),
}

impl ProtocolMessage {
    pub fn protocol_type(&self) -> ProtocolType {
        match self {
            ProtocolMessage::Iso(_) => ProtocolType::Iso,
            ProtocolMessage::PakeV1(_) => ProtocolType::PakeV1,
            ProtocolMessage::PakeV2(_) => ProtocolType::PakeV2,
        }
    }

    /// Position of this message in its protocol, starting at 1.
    pub fn step(&self) -> u8 {
        match self {
            ProtocolMessage::Iso(message) => message.step(),
            ProtocolMessage::PakeV1(message) => message.step(),
            ProtocolMessage::PakeV2(message) => message.step(),
        }
    }
}

impl From<IsoMessage> for ProtocolMessage {
    fn from(value: IsoMessage) -> Self {
        ProtocolMessage::Iso(value)
    }
}

impl From<PakeV1Message> for ProtocolMessage {
    fn from(value: PakeV1Message) -> Self {
        ProtocolMessage::PakeV1(value)
    }
}

impl From<PakeV2Message> for ProtocolMessage {
    fn from(value: PakeV2Message) -> Self {
        ProtocolMessage::PakeV2(value)
    }
}
