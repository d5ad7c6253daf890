// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key-agreement protocols and the registry selecting between them.
//!
//! Each protocol runs as a sub-task: a small state machine which consumes the peer's messages in
//! order and eventually yields a session key. Which protocols a device offers is decided by the
//! algorithm mask of its current version, which one runs is decided by [`ProtocolRegistry`] from
//! the negotiated version.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::crypto::Platform;
use crate::error::AuthError;
use crate::identity::{PeerLookup, UserType};
use crate::message::{OpCode, ProtocolMessage};
use crate::request::{AuthParams, Role};
use crate::secret::SessionKey;
use crate::token::{LiteTokenManager, StandardTokenManager, TokenManager};
use crate::version::{AlgorithmMask, Version};

pub mod iso;
pub mod pake;

use iso::IsoTask;
use pake::v1::PakeV1Task;
use pake::v2::PakeV2Task;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    Iso,
    PakeV1,
    PakeV2,
}

impl ProtocolType {
    /// Every algorithm this protocol family can run.
    pub fn algorithms(&self) -> AlgorithmMask {
        match self {
            ProtocolType::Iso => AlgorithmMask::ISO,
            ProtocolType::PakeV1 => {
                AlgorithmMask::EC_PAKE_V1
                    | AlgorithmMask::DL_PAKE_V1_3072
                    | AlgorithmMask::DL_PAKE_V1_2048
            }
            ProtocolType::PakeV2 => AlgorithmMask::EC_PAKE_V2,
        }
    }

    /// Lowest (major, minor) version this protocol can run with.
    pub fn min_version(&self) -> (u32, u32) {
        match self {
            ProtocolType::Iso | ProtocolType::PakeV1 => (1, 0),
            ProtocolType::PakeV2 => (2, 0),
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolType::Iso => "iso",
            ProtocolType::PakeV1 => "pake-v1",
            ProtocolType::PakeV2 => "pake-v2",
        };
        write!(f, "{name}")
    }
}

type SubTaskFactory = fn(&AuthParams, Version) -> SubTask;

fn create_pake_v2(params: &AuthParams, version: Version) -> SubTask {
    SubTask::PakeV2(PakeV2Task::new(params, version))
}

fn create_pake_v1(params: &AuthParams, version: Version) -> SubTask {
    SubTask::PakeV1(PakeV1Task::new(params, version))
}

fn create_iso(params: &AuthParams, version: Version) -> SubTask {
    SubTask::Iso(IsoTask::new(params, version))
}

/// Registry entry of one protocol.
pub struct ProtocolEntity<P> {
    pub protocol_type: ProtocolType,
    pub algorithms: AlgorithmMask,
    pub token_manager: Arc<dyn TokenManager<P>>,
    factory: SubTaskFactory,
}

impl<P> ProtocolEntity<P> {
    /// True if a client offers this protocol for the operation.
    ///
    /// Binding with the symmetric ISO protocol needs to be explicitly allowed by the request.
    pub(crate) fn admits(&self, op_code: OpCode, iso_bind_compatible: bool) -> bool {
        match (self.protocol_type, op_code) {
            (ProtocolType::Iso, OpCode::Bind) => iso_bind_compatible,
            _ => true,
        }
    }

    pub(crate) fn create(&self, params: &AuthParams, version: Version) -> SubTask {
        (self.factory)(params, version)
    }
}

impl<P> fmt::Debug for ProtocolEntity<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEntity")
            .field("protocol_type", &self.protocol_type)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// Protocols known to an engine, in order of preference.
///
/// Built once and never modified afterwards.
#[derive(Debug)]
pub struct ProtocolRegistry<P> {
    entities: Vec<ProtocolEntity<P>>,
}

impl<P: Platform + 'static> ProtocolRegistry<P> {
    /// Registers every protocol which can run at least one of the given algorithms.
    pub fn new(algorithms: AlgorithmMask) -> Self {
        let standard: Arc<dyn TokenManager<P>> = Arc::new(StandardTokenManager);
        let lite: Arc<dyn TokenManager<P>> = Arc::new(LiteTokenManager);

        let candidates: [(ProtocolType, Arc<dyn TokenManager<P>>, SubTaskFactory); 3] = [
            (ProtocolType::PakeV2, standard.clone(), create_pake_v2),
            (ProtocolType::PakeV1, standard, create_pake_v1),
            (ProtocolType::Iso, lite, create_iso),
        ];

        let entities = candidates
            .into_iter()
            .filter_map(|(protocol_type, token_manager, factory)| {
                let supported = protocol_type.algorithms() & algorithms;
                if supported.is_empty() {
                    return None;
                }
                Some(ProtocolEntity {
                    protocol_type,
                    algorithms: supported,
                    token_manager,
                    factory,
                })
            })
            .collect();

        Self { entities }
    }
}

impl<P> ProtocolRegistry<P> {
    pub fn iter(&self) -> impl Iterator<Item = &ProtocolEntity<P>> {
        self.entities.iter()
    }

    pub fn get(&self, protocol_type: ProtocolType) -> Option<&ProtocolEntity<P>> {
        self.entities
            .iter()
            .find(|entity| entity.protocol_type == protocol_type)
    }

    /// Union of the algorithms of all registered protocols.
    pub fn algorithms(&self) -> AlgorithmMask {
        self.entities
            .iter()
            .fold(AlgorithmMask::EMPTY, |mask, entity| mask | entity.algorithms)
    }

    /// Maps a negotiated version to the protocol both sides run.
    ///
    /// The first registered protocol which runs one of the negotiated algorithms, supports the
    /// negotiated major and minor version and is admitted for the operation by the local request
    /// is selected.
    pub fn protocol_type(
        &self,
        version: &Version,
        op_code: OpCode,
        iso_bind_compatible: bool,
    ) -> Result<ProtocolType, AuthError> {
        let selected = self
            .entities
            .iter()
            .find(|entity| {
                entity.algorithms.intersects(version.patch)
                    && (version.major, version.minor) >= entity.protocol_type.min_version()
                    && entity.admits(op_code, iso_bind_compatible)
            })
            .map(|entity| entity.protocol_type)
            .ok_or(AuthError::NotSupported)?;
        trace!(%version, ?op_code, protocol = %selected, "selected protocol");
        Ok(selected)
    }
}

/// Everything a sub-task needs to process a message.
pub(crate) struct ProtocolContext<'a, P> {
    pub provider: &'a P,
    pub token_manager: &'a dyn TokenManager<P>,
    pub identities: &'a dyn PeerLookup,
    pub params: &'a AuthParams,
}

impl<P> ProtocolContext<'_, P> {
    /// Checks that the identity declared by the peer is the one expected for this task.
    ///
    /// An explicitly expected peer always has to match. Outside of binding the peer additionally
    /// has to be known to the identity store, with the declared user type if one was sent.
    pub fn verify_peer(
        &self,
        auth_id: &[u8],
        user_type: Option<UserType>,
    ) -> Result<(), AuthError> {
        if auth_id.is_empty() {
            return Err(AuthError::InvalidInput("empty peer auth id"));
        }

        let expected = self.params.peer_auth_id.as_deref();
        if expected.is_some_and(|expected| expected != auth_id) {
            return Err(AuthError::UnexpectedPeer);
        }

        if self.params.op_code == OpCode::Bind {
            return Ok(());
        }

        match self
            .identities
            .lookup_peer_record(&self.params.service_type, auth_id)?
        {
            None => Err(AuthError::UnexpectedPeer),
            Some(record) if user_type.is_some_and(|user_type| user_type != record.user_type) => {
                Err(AuthError::UnexpectedPeer)
            }
            Some(_) => Ok(()),
        }
    }
}

/// Result of a sub-task processing one message.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    Continue(ProtocolMessage),
    Finish {
        send_to_peer: Option<ProtocolMessage>,
        session_key: SessionKey,
    },
    /// Message was a duplicate, nothing changed.
    Ignore,
}

impl StepOutcome {
    fn sends(&self) -> bool {
        matches!(
            self,
            StepOutcome::Continue(_)
                | StepOutcome::Finish {
                    send_to_peer: Some(_),
                    ..
                }
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StepCheck {
    Process,
    Ignore,
}

/// Tracks the last step a sub-task handled.
///
/// Steps count the messages of a protocol, both sent and received. A client sends step 1 and
/// first receives step 2, a server first receives step 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StepCounter {
    status: u8,
    first_inbound: u8,
}

impl StepCounter {
    pub fn new(role: Role) -> Self {
        let first_inbound = match role {
            Role::Client => 2,
            Role::Server => 1,
        };
        Self {
            status: 0,
            first_inbound,
        }
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    /// Decides how to handle an incoming message of the given step.
    ///
    /// Duplicates are ignored before any protocol handler runs, so replayed messages never touch
    /// session state.
    pub fn check(&self, step: u8) -> Result<StepCheck, AuthError> {
        if step < self.first_inbound {
            return Err(AuthError::InvalidInput("step below first inbound step"));
        }
        if step <= self.status {
            trace!(step, status = self.status, "ignore duplicate message");
            return Ok(StepCheck::Ignore);
        }
        if step != self.status + 1 {
            return Err(AuthError::InvalidInput("unexpected step"));
        }
        Ok(StepCheck::Process)
    }

    /// Records that a message of the given step was sent without receiving anything before.
    pub fn sent(&mut self, step: u8) {
        self.status = step;
    }

    /// Records that the message of the given step was handled.
    pub fn advance(&mut self, step: u8, outcome: &StepOutcome) {
        self.status = if outcome.sends() { step + 1 } else { step };
    }
}

/// Protocol specific sub-task of an authentication task.
#[derive(Debug)]
pub(crate) enum SubTask {
    Iso(IsoTask),
    PakeV1(PakeV1Task),
    PakeV2(PakeV2Task),
}

impl SubTask {
    pub fn protocol_type(&self) -> ProtocolType {
        match self {
            SubTask::Iso(_) => ProtocolType::Iso,
            SubTask::PakeV1(_) => ProtocolType::PakeV1,
            SubTask::PakeV2(_) => ProtocolType::PakeV2,
        }
    }

    pub fn step(&self) -> u8 {
        match self {
            SubTask::Iso(task) => task.steps.status(),
            SubTask::PakeV1(task) => task.steps.status(),
            SubTask::PakeV2(task) => task.steps.status(),
        }
    }

    /// Pins the version after negotiation finished.
    pub fn decide_version(&mut self, version: Version) {
        match self {
            SubTask::Iso(task) => task.version = version,
            SubTask::PakeV1(task) => task.version = version,
            SubTask::PakeV2(task) => task.version = version,
        }
    }

    /// First message of a client.
    pub fn start<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<ProtocolMessage, AuthError> {
        match self {
            SubTask::Iso(task) => task.start(ctx).map(ProtocolMessage::Iso),
            SubTask::PakeV1(task) => task.start(ctx).map(ProtocolMessage::PakeV1),
            SubTask::PakeV2(task) => task.start(ctx).map(ProtocolMessage::PakeV2),
        }
    }

    pub fn process<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        message: &ProtocolMessage,
    ) -> Result<StepOutcome, AuthError> {
        match (self, message) {
            (SubTask::Iso(task), ProtocolMessage::Iso(message)) => task.process(ctx, message),
            (SubTask::PakeV1(task), ProtocolMessage::PakeV1(message)) => {
                task.process(ctx, message)
            }
            (SubTask::PakeV2(task), ProtocolMessage::PakeV2(message)) => {
                task.process(ctx, message)
            }
            _ => Err(AuthError::InvalidInput("message of another protocol")),
        }
    }
}
