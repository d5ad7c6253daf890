// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication tasks and their version negotiation state machine.
//!
//! A task wraps the request of the caller and every protocol still in the running for it. The
//! client starts with one candidate per protocol it offers and prunes all but one as soon as the
//! server's answer reveals the negotiated version. The server decides on a single protocol when
//! it receives the client's first message:
//!
//! ```text
//! client: Initial -> VersionConfirmed -> VersionDecided
//! server: Initial -> VersionDecided
//! ```
//!
//! Once decided, the version never changes and every message of the peer has to carry it.
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::crypto::Platform;
use crate::error::AuthError;
use crate::identity::PeerLookup;
use crate::message::{MessageBody, OpCode, PeerMessage, ProtocolMessage, VersionExchange};
use crate::protocol::{
    ProtocolContext, ProtocolEntity, ProtocolRegistry, ProtocolType, StepOutcome, SubTask,
};
use crate::request::{AuthParams, Role};
use crate::secret::SessionKey;
use crate::version::{AlgorithmMask, Version, negotiate_version};

/// Identifier of a live task, unique within one engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    pub(crate) fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionStatus {
    /// Nothing was exchanged yet.
    Initial,

    /// Client sent its candidates and waits for the server's choice.
    VersionConfirmed,

    /// Both sides agreed on version and protocol.
    VersionDecided,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    pub op_code: OpCode,
    pub status: VersionStatus,
    pub min_version: Version,

    /// Own current version. Narrowed to the negotiated version once decided.
    pub cur_version: Version,
}

/// Snapshot of a live task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub role: Role,
    pub version_info: VersionInfo,

    /// Protocols still in the running, in order of preference.
    pub protocols: Vec<ProtocolType>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Send the message to the peer and wait for its answer.
    Continue,

    /// Handshake completed, a session key is available. The task is gone.
    Finish,

    /// The message was a duplicate and got dropped.
    IgnoreMessage,
}

#[derive(Debug)]
pub struct TaskOutput {
    pub status: TaskStatus,
    pub send_to_peer: Option<PeerMessage>,
    pub session_key: Option<SessionKey>,
}

impl TaskOutput {
    fn ignore() -> Self {
        Self {
            status: TaskStatus::IgnoreMessage,
            send_to_peer: None,
            session_key: None,
        }
    }
}

/// Terminal failure of a task.
///
/// The task is removed when this is returned. If `send_to_peer` is set, the caller is expected
/// to forward it so the peer fails its side of the handshake as well.
#[derive(Debug, Error)]
#[error("task failed: {error}")]
pub struct TaskFailure {
    pub error: AuthError,

    /// Selected protocol, if the task got that far.
    pub protocol: Option<ProtocolType>,

    /// Last step the selected protocol handled.
    pub step: Option<u8>,

    pub send_to_peer: Option<PeerMessage>,
}

impl TaskFailure {
    /// Failure which is only reported to the local caller.
    pub(crate) fn local(error: AuthError) -> Self {
        Self {
            error,
            protocol: None,
            step: None,
            send_to_peer: None,
        }
    }
}

/// Engine state a task runs against.
pub(crate) struct TaskEnv<'a, P> {
    pub provider: &'a P,
    pub identities: &'a dyn PeerLookup,
    pub registry: &'a ProtocolRegistry<P>,
    pub config: &'a EngineConfig,
}

impl<'a, P> TaskEnv<'a, P> {
    fn context<'b>(
        &'b self,
        entity: &'b ProtocolEntity<P>,
        params: &'b AuthParams,
    ) -> ProtocolContext<'b, P> {
        ProtocolContext {
            provider: self.provider,
            token_manager: entity.token_manager.as_ref(),
            identities: self.identities,
            params,
        }
    }

    fn entity(&self, protocol_type: ProtocolType) -> Result<&'a ProtocolEntity<P>, AuthError> {
        self.registry
            .get(protocol_type)
            .ok_or(AuthError::NotSupported)
    }
}

#[derive(Debug)]
pub(crate) struct Task {
    version_info: VersionInfo,
    params: AuthParams,
    candidates: Vec<SubTask>,
}

impl Task {
    /// Creates a task and produces its first output.
    ///
    /// A server task needs the client's first message as input.
    pub fn create<P: Platform>(
        env: &TaskEnv<'_, P>,
        params: AuthParams,
        input: Option<&PeerMessage>,
    ) -> Result<(Self, TaskOutput), TaskFailure> {
        let mut cur_version = env.config.cur_version;
        cur_version.patch = env.registry.algorithms();

        let mut task = Self {
            version_info: VersionInfo {
                op_code: params.op_code,
                status: VersionStatus::Initial,
                min_version: env.config.min_version,
                cur_version,
            },
            params,
            candidates: Vec::new(),
        };

        let result = match (task.params.role, input) {
            (Role::Client, _) => task.start_client(env),
            (Role::Server, Some(input)) => task.start_server(env, input),
            (Role::Server, None) => Err(AuthError::InvalidInput(
                "server task needs the client's first message",
            )),
        };

        match result {
            Ok(output) => Ok((task, output)),
            Err(error) => Err(task.fail(error)),
        }
    }

    pub fn process<P: Platform>(
        &mut self,
        env: &TaskEnv<'_, P>,
        input: &PeerMessage,
    ) -> Result<TaskOutput, TaskFailure> {
        self.handle(env, input).map_err(|error| self.fail(error))
    }

    pub fn info(&self, task_id: TaskId) -> TaskInfo {
        TaskInfo {
            task_id,
            role: self.params.role,
            version_info: self.version_info,
            protocols: self
                .candidates
                .iter()
                .map(|candidate| candidate.protocol_type())
                .collect(),
        }
    }

    /// Turns an error into the terminal failure of this task.
    ///
    /// Errors reported by the peer before any protocol was selected stay local, as does any
    /// error of a client which did not send anything yet.
    pub fn fail(&self, error: AuthError) -> TaskFailure {
        let status = self.version_info.status;
        let selected = match status {
            VersionStatus::VersionDecided => self.candidates.first(),
            _ => None,
        };

        let local_only = status == VersionStatus::Initial
            && (self.params.is_client() || matches!(error, AuthError::PeerReported(_)));
        let send_to_peer = (!local_only).then(|| self.message(MessageBody::Error(error.code())));

        let protocol = selected.map(|candidate| candidate.protocol_type());
        let step = selected.map(|candidate| candidate.step());
        warn!(
            %error,
            ?protocol,
            ?step,
            ?status,
            "task failed"
        );

        TaskFailure {
            error,
            protocol,
            step,
            send_to_peer,
        }
    }

    /// Builds one candidate per offered protocol and bundles their first messages.
    fn start_client<P: Platform>(&mut self, env: &TaskEnv<'_, P>) -> Result<TaskOutput, AuthError> {
        let cur_version = self.version_info.cur_version;
        let mut algorithms = AlgorithmMask::EMPTY;
        let mut messages = Vec::new();

        for entity in env.registry.iter() {
            if !entity.admits(self.params.op_code, self.params.iso_bind_compatible)
                || (cur_version.major, cur_version.minor) < entity.protocol_type.min_version()
            {
                continue;
            }

            let version = Version::new(cur_version.major, cur_version.minor, entity.algorithms);
            let mut candidate = entity.create(&self.params, version);
            messages.push(candidate.start(&env.context(entity, &self.params))?);
            algorithms = algorithms | entity.algorithms;
            self.candidates.push(candidate);
        }

        if self.candidates.is_empty() {
            return Err(AuthError::TaskCreationFailed);
        }

        self.version_info.cur_version.patch = algorithms;
        self.version_info.status = VersionStatus::VersionConfirmed;
        debug!(
            op_code = ?self.params.op_code,
            version = %self.version_info.cur_version,
            candidates = self.candidates.len(),
            "offered protocols"
        );

        Ok(TaskOutput {
            status: TaskStatus::Continue,
            send_to_peer: Some(self.message(MessageBody::Candidates(messages))),
            session_key: None,
        })
    }

    /// Negotiates the version with the client's offer and runs the selected protocol.
    fn start_server<P: Platform>(
        &mut self,
        env: &TaskEnv<'_, P>,
        input: &PeerMessage,
    ) -> Result<TaskOutput, AuthError> {
        self.check_op_code(input)?;
        let offered: Vec<&ProtocolMessage> = match &input.body {
            MessageBody::Error(code) => return Err(AuthError::PeerReported(*code)),
            MessageBody::Candidates(candidates) => candidates.iter().collect(),
            MessageBody::Protocol(message) => vec![message],
        };

        let peer = input
            .version
            .ok_or(AuthError::InvalidInput("missing peer version"))?;
        let negotiated = negotiate_version(
            &self.version_info.min_version,
            &self.version_info.cur_version,
            &peer.min,
            &peer.cur,
        )?;
        let protocol_type = env.registry.protocol_type(
            &negotiated,
            self.params.op_code,
            self.params.iso_bind_compatible,
        )?;
        let entity = env.entity(protocol_type)?;

        let payload = offered
            .into_iter()
            .find(|message| message.protocol_type() == protocol_type)
            .ok_or(AuthError::InvalidInput(
                "offer misses the negotiated protocol",
            ))?;

        let decided = Version::new(
            negotiated.major,
            negotiated.minor,
            negotiated.patch & entity.algorithms,
        );
        self.candidates.push(entity.create(&self.params, decided));
        self.version_info.cur_version = decided;
        self.version_info.status = VersionStatus::VersionDecided;
        debug!(version = %decided, protocol = %protocol_type, "decided version");

        self.run(env, payload)
    }

    fn handle<P: Platform>(
        &mut self,
        env: &TaskEnv<'_, P>,
        input: &PeerMessage,
    ) -> Result<TaskOutput, AuthError> {
        self.check_op_code(input)?;
        let message = match &input.body {
            MessageBody::Error(code) => return Err(AuthError::PeerReported(*code)),
            MessageBody::Candidates(_) => {
                return Err(AuthError::InvalidInput("unexpected protocol offer"));
            }
            MessageBody::Protocol(message) => message,
        };

        match self.version_info.status {
            VersionStatus::Initial => return Err(AuthError::InvalidInput("task was not started")),
            VersionStatus::VersionConfirmed => self.decide_version(env, input.version, message)?,
            VersionStatus::VersionDecided => {
                let peer = input.version.ok_or(AuthError::UnsupportedVersion)?;
                if peer.cur != self.version_info.cur_version {
                    return Err(AuthError::UnsupportedVersion);
                }
            }
        }

        self.run(env, message)
    }

    /// Client side of the second negotiation round.
    ///
    /// The version the server declares has to be exactly what negotiating against it gives, and
    /// its message has to belong to the protocol that version selects. All other candidates are
    /// dropped together with their key material.
    fn decide_version<P: Platform>(
        &mut self,
        env: &TaskEnv<'_, P>,
        peer: Option<VersionExchange>,
        message: &ProtocolMessage,
    ) -> Result<(), AuthError> {
        let peer = peer.ok_or(AuthError::InvalidInput("missing peer version"))?;
        let negotiated = negotiate_version(
            &self.version_info.min_version,
            &self.version_info.cur_version,
            &peer.min,
            &peer.cur,
        )?;
        if negotiated != peer.cur {
            return Err(AuthError::UnsupportedVersion);
        }

        let protocol_type = env.registry.protocol_type(
            &negotiated,
            self.params.op_code,
            self.params.iso_bind_compatible,
        )?;
        if message.protocol_type() != protocol_type {
            return Err(AuthError::InvalidInput(
                "message does not belong to the negotiated protocol",
            ));
        }

        let offered = self.candidates.len();
        self.candidates
            .retain(|candidate| candidate.protocol_type() == protocol_type);
        let selected = self
            .candidates
            .first_mut()
            .ok_or(AuthError::NotSupported)?;
        selected.decide_version(negotiated);

        self.version_info.cur_version = negotiated;
        self.version_info.status = VersionStatus::VersionDecided;
        debug!(
            version = %negotiated,
            protocol = %protocol_type,
            pruned = offered - self.candidates.len(),
            "decided version"
        );
        Ok(())
    }

    /// Hands a message to the selected protocol.
    fn run<P: Platform>(
        &mut self,
        env: &TaskEnv<'_, P>,
        message: &ProtocolMessage,
    ) -> Result<TaskOutput, AuthError> {
        let selected = self
            .candidates
            .first_mut()
            .ok_or(AuthError::InvalidInput("no protocol selected"))?;
        let protocol_type = selected.protocol_type();
        let entity = env.entity(protocol_type)?;
        let outcome = selected.process(&env.context(entity, &self.params), message)?;
        let step = selected.step();

        let output = match outcome {
            StepOutcome::Continue(message) => TaskOutput {
                status: TaskStatus::Continue,
                send_to_peer: Some(self.message(MessageBody::Protocol(message))),
                session_key: None,
            },
            StepOutcome::Finish {
                send_to_peer,
                session_key,
            } => {
                debug!(protocol = %protocol_type, step, "handshake finished");
                TaskOutput {
                    status: TaskStatus::Finish,
                    send_to_peer: send_to_peer
                        .map(|message| self.message(MessageBody::Protocol(message))),
                    session_key: Some(session_key),
                }
            }
            StepOutcome::Ignore => return Ok(TaskOutput::ignore()),
        };

        trace!(protocol = %protocol_type, step, status = ?output.status, "processed message");
        Ok(output)
    }

    fn check_op_code(&self, input: &PeerMessage) -> Result<(), AuthError> {
        if input.op_code != self.params.op_code {
            return Err(AuthError::InvalidInput("operation does not match the task"));
        }
        Ok(())
    }

    /// Wraps a body into a message carrying the own version.
    fn message(&self, body: MessageBody) -> PeerMessage {
        PeerMessage {
            op_code: self.params.op_code,
            version: Some(VersionExchange {
                min: self.version_info.min_version,
                cur: self.version_info.cur_version,
            }),
            body,
        }
    }
}
