// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixtures for devices running handshakes against each other in memory.
use crate::{
    AuthRequest, Engine, EngineConfig, MemoryIdentityStore, OpCode, PeerMessage, PeerRecord,
    Provider, Role, SessionKey, TaskFailure, TaskId, TaskStatus, TokenParams, UserType,
};

pub const TEST_PACKAGE: &str = "org.p2panda.test";

pub const TEST_SERVICE: &str = "lights";

pub const TEST_PIN: &str = "123456";

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Device with its own deterministic provider and identity store.
pub struct TestDevice {
    pub auth_id: Vec<u8>,
    pub user_type: UserType,
    pub engine: Engine<Provider, MemoryIdentityStore>,
}

impl TestDevice {
    pub fn new(auth_id: &[u8], user_type: UserType, seed: u8) -> Self {
        Self::with_config(auth_id, user_type, seed, EngineConfig::default())
    }

    pub fn with_config(
        auth_id: &[u8],
        user_type: UserType,
        seed: u8,
        config: EngineConfig,
    ) -> Self {
        Self {
            auth_id: auth_id.to_vec(),
            user_type,
            engine: Engine::new(
                config,
                Provider::from_seed([seed; 32]),
                MemoryIdentityStore::new(),
            ),
        }
    }

    pub fn request(&self, op_code: OpCode) -> AuthRequest {
        AuthRequest::new(op_code, TEST_PACKAGE, TEST_SERVICE, &self.auth_id)
            .with_user_type(self.user_type)
    }

    /// Records the peer as known, as an application does after binding.
    pub fn trust(&self, peer: &TestDevice) {
        self.engine
            .identities()
            .insert(
                TEST_SERVICE,
                PeerRecord {
                    auth_id: peer.auth_id.clone(),
                    user_type: peer.user_type,
                },
            )
            .unwrap();
    }

    pub fn token_params(&self) -> TokenParams {
        TokenParams::new(TEST_PACKAGE, TEST_SERVICE, &self.auth_id)
    }

    /// Token parameters for material this device stores about the peer.
    pub fn peer_token_params(&self, peer: &TestDevice) -> TokenParams {
        TokenParams::new(TEST_PACKAGE, TEST_SERVICE, &peer.auth_id)
    }
}

/// Result of a handshake where both sides finished.
pub struct Handshake {
    pub client_key: SessionKey,
    pub server_key: SessionKey,

    /// Messages exchanged, starting with the client's offer.
    pub messages: Vec<PeerMessage>,
}

/// Runs a full handshake, passing messages back and forth until both sides finished.
///
/// Returns the first failure of either side.
pub fn run_handshake(
    client: &TestDevice,
    client_request: AuthRequest,
    server: &TestDevice,
    server_request: AuthRequest,
) -> Result<Handshake, TaskFailure> {
    let mut messages = Vec::new();

    let (client_task, output) = client
        .engine
        .create_task(Role::Client, client_request, None)?;
    let offer = output.send_to_peer.expect("client sends an offer");
    messages.push(offer.clone());

    let (server_task, output) = server
        .engine
        .create_task(Role::Server, server_request, Some(&offer))?;
    let mut to_client = output.send_to_peer;

    let mut client_key = None;
    let mut server_key = None;

    while let Some(message) = to_client.take() {
        messages.push(message.clone());
        let output = client.engine.process_task(client_task, &message)?;
        if output.status == TaskStatus::Finish {
            client_key = output.session_key;
        }

        let Some(message) = output.send_to_peer else {
            break;
        };
        messages.push(message.clone());
        let output = server.engine.process_task(server_task, &message)?;
        if output.status == TaskStatus::Finish {
            server_key = output.session_key;
        }
        to_client = output.send_to_peer;
    }

    Ok(Handshake {
        client_key: client_key.expect("client finished"),
        server_key: server_key.expect("server finished"),
        messages,
    })
}

/// Binds both devices with the test PIN and makes them trust each other.
pub fn bind(client: &TestDevice, server: &TestDevice, client_request: AuthRequest) -> Handshake {
    let handshake = run_handshake(
        client,
        client_request.with_pin(TEST_PIN),
        server,
        server.request(OpCode::Bind).with_pin(TEST_PIN),
    )
    .expect("binding succeeds");

    client.trust(server);
    server.trust(client);
    handshake
}

/// Creates a client task and returns it together with its offer.
pub fn start_client(client: &TestDevice, request: AuthRequest) -> (TaskId, PeerMessage) {
    let (task_id, output) = client
        .engine
        .create_task(Role::Client, request, None)
        .unwrap();
    (task_id, output.send_to_peer.unwrap())
}
