// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-device-auth` establishes trust between two devices and derives a shared session key
//! for every handshake they run.
//!
//! Devices first **bind** with a PIN shared out-of-band, for example shown on one screen and typed
//! into the other. Binding persists credentials in the platform key store of both devices, which
//! they later use to **authenticate** each other without the PIN. **Unbinding** authenticates one
//! last time and removes those credentials on both sides.
//!
//! ## Protocols
//!
//! Three key-agreement protocols are implemented, listed in order of preference:
//!
//! - **PAKE v2**: password-authenticated key exchange over Ristretto255 with transcript-bound key
//!   confirmation and declared device roles.
//! - **PAKE v1**: password-authenticated key exchange over Ristretto255 or the RFC 3526 MODP
//!   groups (2048 and 3072 bit), with challenge-based key confirmation.
//! - **ISO**: symmetric challenge-response. Binding with it has to be explicitly allowed per
//!   request, as it transfers the long-term credential encrypted under a PIN-derived key.
//!
//! Which protocols a device runs follows from the algorithm mask of its [`Version`]. When two
//! devices meet, the client offers the first message of every protocol it runs and the server
//! picks one from the negotiated version. From then on both sides only run that protocol and
//! every message has to carry the negotiated version.
//!
//! ## Usage
//!
//! An [`Engine`] drives all handshakes of a device. It is constructed with a [`Platform`]
//! implementation providing cryptographic primitives and the key store, and an
//! [`IdentityStore`] to look up known peers. [`Provider`] is a software implementation of the
//! former, [`MemoryIdentityStore`] of the latter.
//!
//! Each handshake is a task. The client creates its task without input and sends the resulting
//! message to the server, which creates its task from that message. Afterwards both sides pass
//! every received message to [`Engine::process_task`] (or [`Engine::process_bytes`] for encoded
//! messages) until the task finishes with a [`SessionKey`] or fails with a [`TaskFailure`]. A
//! failure usually carries a message for the peer, forwarding it makes the peer's task fail as
//! well.
//!
//! Transport is up to the application. Messages encode to CBOR.
mod cbor;
mod config;
pub mod crypto;
mod engine;
mod error;
mod identity;
mod key_alias;
mod message;
pub mod protocol;
mod request;
mod secret;
mod task;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;
pub mod token;
mod version;

pub use cbor::{DecodeError, EncodeError};
pub use config::{DEFAULT_MAX_TASKS, EngineConfig};
pub use crypto::{CryptoProvider, KeyStore, Platform, Provider, RandProvider};
pub use engine::Engine;
pub use error::{AuthError, ErrorCode};
pub use identity::{IdentityStore, IdentityStoreError, MemoryIdentityStore, PeerRecord, UserType};
pub use key_alias::{KeyAlias, KeyPurpose};
pub use message::{MessageBody, OpCode, PeerMessage, ProtocolMessage, VersionExchange};
pub use protocol::ProtocolType;
pub use request::{AuthRequest, Role};
pub use secret::{SESSION_KEY_SIZE, SessionKey};
pub use task::{
    TaskFailure, TaskId, TaskInfo, TaskOutput, TaskStatus, VersionInfo, VersionStatus,
};
pub use token::{LiteTokenManager, StandardTokenManager, TokenManager, TokenParams};
pub use version::{AlgorithmMask, Version, negotiate_version};
