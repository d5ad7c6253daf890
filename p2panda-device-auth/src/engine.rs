// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entry point driving authentication tasks.
//!
//! The engine owns the crypto provider, the identity store, the protocol registry and the table
//! of live tasks. Callers create a task per handshake, feed it every message they receive from
//! the peer and forward whatever the task wants to send back.
//!
//! The table lock is only held to look up, insert or remove tasks. Each task sits behind its own
//! lock, so handshakes with different peers never wait on each other.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::crypto::{Platform, RandProvider};
use crate::error::AuthError;
use crate::identity::IdentityStore;
use crate::message::PeerMessage;
use crate::protocol::ProtocolRegistry;
use crate::request::{AuthParams, AuthRequest, Role};
use crate::task::{Task, TaskEnv, TaskFailure, TaskId, TaskInfo, TaskOutput, TaskStatus};
use crate::token::{TokenManager, TokenParams};

/// Attempts at drawing an unused task id before giving up.
const TASK_ID_ATTEMPTS: usize = 16;

type TaskTable = HashMap<TaskId, Arc<Mutex<Task>>>;

#[derive(Debug)]
pub struct Engine<P, S> {
    config: EngineConfig,
    provider: P,
    identities: S,
    registry: ProtocolRegistry<P>,
    tasks: Mutex<TaskTable>,
}

impl<P, S> Engine<P, S>
where
    P: Platform + 'static,
    S: IdentityStore,
{
    /// Creates an engine running the protocols enabled by the configured version.
    pub fn new(config: EngineConfig, provider: P, identities: S) -> Self {
        let registry = ProtocolRegistry::new(config.cur_version.patch);
        debug!(
            min_version = %config.min_version,
            cur_version = %config.cur_version,
            protocols = ?registry.iter().map(|entity| entity.protocol_type).collect::<Vec<_>>(),
            "created engine"
        );

        Self {
            config,
            provider,
            identities,
            registry,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn identities(&self) -> &S {
        &self.identities
    }

    pub fn registry(&self) -> &ProtocolRegistry<P> {
        &self.registry
    }

    /// Creates a task and returns its first output.
    ///
    /// Clients pass no input and receive the message offering all their protocols. Servers pass
    /// the client's first message and receive the answer of the protocol they selected.
    pub fn create_task(
        &self,
        role: Role,
        request: AuthRequest,
        input: Option<&PeerMessage>,
    ) -> Result<(TaskId, TaskOutput), TaskFailure> {
        self.check_capacity().map_err(TaskFailure::local)?;

        let params = AuthParams::new(role, request);
        let (task, output) = Task::create(&self.env(), params, input)?;
        let task_id = self.insert(task).map_err(TaskFailure::local)?;
        debug!(%task_id, ?role, "created task");

        Ok((task_id, output))
    }

    /// Processes a message of the peer.
    ///
    /// Tasks which finish or fail are removed, every later call with their id fails with
    /// [`TaskNotFound`](AuthError::TaskNotFound).
    pub fn process_task(
        &self,
        task_id: TaskId,
        input: &PeerMessage,
    ) -> Result<TaskOutput, TaskFailure> {
        let task = self.get(task_id).map_err(TaskFailure::local)?;
        let result = match task.lock() {
            Ok(mut task) => task.process(&self.env(), input),
            Err(_) => Err(TaskFailure::local(AuthError::LockPoisoned)),
        };

        match &result {
            Ok(output) if output.status == TaskStatus::Finish => {
                self.remove(task_id);
                debug!(%task_id, "task finished");
            }
            Ok(_) => (),
            Err(failure) => {
                self.remove(task_id);
                debug!(%task_id, error = %failure.error, "removed failed task");
            }
        }

        result
    }

    /// Processes an encoded message of the peer and encodes the answer.
    ///
    /// Bytes which do not decode fail the task like any other invalid message.
    pub fn process_bytes(
        &self,
        task_id: TaskId,
        bytes: &[u8],
    ) -> Result<(TaskOutput, Option<Vec<u8>>), TaskFailure> {
        let input = match PeerMessage::from_bytes(bytes) {
            Ok(input) => input,
            Err(error) => return Err(self.fail_task(task_id, error)),
        };

        let output = self.process_task(task_id, &input)?;
        let bytes = output
            .send_to_peer
            .as_ref()
            .map(PeerMessage::to_bytes)
            .transpose()
            .map_err(TaskFailure::local)?;
        Ok((output, bytes))
    }

    /// Removes a task and wipes its key material. Unknown ids are ignored.
    pub fn destroy_task(&self, task_id: TaskId) {
        if self.remove(task_id) {
            debug!(%task_id, "destroyed task");
        }
    }

    pub fn task_info(&self, task_id: TaskId) -> Result<TaskInfo, AuthError> {
        let task = self.get(task_id)?;
        let task = task.lock().map_err(|_| AuthError::LockPoisoned)?;
        Ok(task.info(task_id))
    }

    pub fn live_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Provisions the local identity for every registered protocol.
    pub fn register_local_identity(&self, params: &TokenParams) -> Result<(), AuthError> {
        self.fan_out("register local identity", |manager| {
            manager.register_local_identity(&self.provider, params)
        })
    }

    pub fn unregister_local_identity(&self, params: &TokenParams) -> Result<(), AuthError> {
        self.fan_out("unregister local identity", |manager| {
            manager.unregister_local_identity(&self.provider, params)
        })
    }

    /// Removes everything any protocol stored about the peer named in `params`.
    pub fn delete_peer_auth_info(&self, params: &TokenParams) -> Result<(), AuthError> {
        self.fan_out("delete peer auth info", |manager| {
            manager.delete_peer_auth_info(&self.provider, params)
        })
    }

    /// Returns the first public key any registered protocol has for the identity.
    pub fn get_public_key(&self, params: &TokenParams) -> Result<Vec<u8>, AuthError> {
        let mut first_error = None;
        for entity in self.registry.iter() {
            match entity.token_manager.get_public_key(&self.provider, params) {
                Ok(public_key) => return Ok(public_key),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        Err(first_error.unwrap_or(AuthError::NotSupported))
    }

    /// Runs a token operation for every registered protocol. All of them run even if one fails,
    /// the first error is returned.
    fn fan_out<F>(&self, operation: &str, f: F) -> Result<(), AuthError>
    where
        F: Fn(&dyn TokenManager<P>) -> Result<(), AuthError>,
    {
        let mut first_error = None;
        for entity in self.registry.iter() {
            if let Err(error) = f(entity.token_manager.as_ref()) {
                warn!(protocol = %entity.protocol_type, %error, "{operation} failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn env(&self) -> TaskEnv<'_, P> {
        TaskEnv {
            provider: &self.provider,
            identities: &self.identities,
            registry: &self.registry,
            config: &self.config,
        }
    }

    fn check_capacity(&self) -> Result<(), AuthError> {
        let tasks = self.tasks.lock().map_err(|_| AuthError::LockPoisoned)?;
        if tasks.len() >= self.config.max_tasks {
            warn!(max_tasks = self.config.max_tasks, "task table is full");
            return Err(AuthError::AllocationFailed);
        }
        Ok(())
    }

    /// Inserts a task under a fresh random id.
    ///
    /// Capacity is checked again, other tasks might have been created while this one was built.
    fn insert(&self, task: Task) -> Result<TaskId, AuthError> {
        let mut tasks = self.tasks.lock().map_err(|_| AuthError::LockPoisoned)?;
        if tasks.len() >= self.config.max_tasks {
            return Err(AuthError::AllocationFailed);
        }

        for _ in 0..TASK_ID_ATTEMPTS {
            let bytes = RandProvider::random_array(&self.provider).map_err(AuthError::crypto)?;
            let task_id = TaskId::new(u32::from_be_bytes(bytes));
            if !tasks.contains_key(&task_id) {
                tasks.insert(task_id, Arc::new(Mutex::new(task)));
                return Ok(task_id);
            }
        }

        Err(AuthError::AllocationFailed)
    }

    fn get(&self, task_id: TaskId) -> Result<Arc<Mutex<Task>>, AuthError> {
        let tasks = self.tasks.lock().map_err(|_| AuthError::LockPoisoned)?;
        tasks.get(&task_id).cloned().ok_or(AuthError::TaskNotFound)
    }

    /// Returns true if a task was removed.
    fn remove(&self, task_id: TaskId) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id)
            .is_some()
    }

    /// Fails a live task outside of regular message processing.
    fn fail_task(&self, task_id: TaskId, error: AuthError) -> TaskFailure {
        let task = match self.get(task_id) {
            Ok(task) => task,
            Err(err) => return TaskFailure::local(err),
        };
        let failure = match task.lock() {
            Ok(task) => task.fail(error),
            Err(_) => TaskFailure::local(error),
        };
        self.remove(task_id);
        failure
    }
}
