// SPDX-License-Identifier: MIT OR Apache-2.0

//! PAKE v1, running over Ristretto255 or one of the MODP groups.
//!
//! ```text
//! client                                      server
//!   | -- 1 Start { auth_id } -------------------> |
//!   | <-- 2 Response { auth_id, salt, epk, chal } |
//!   | -- 3 Confirm { epk, chal, kcf, exchange? } > |
//!   | <-- 4 Result { kcf, exchange? } ----------- |
//! ```
//!
//! Key confirmation is a MAC over both challenges, in the sender's order.
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::hkdf::HMAC_SIZE;
use crate::crypto::{Platform, RandProvider};
use crate::error::AuthError;
use crate::message::OpCode;
use crate::protocol::pake::{
    PakeCurve, PakeSessionParams, SALT_SIZE, SealedExchange, SessionKeys, agree_shared_secret,
    finish_unbind, generate_pake_params, open_exchange, pake_base_secret, pake_psk,
    seal_exchange, verify_confirmation,
};
use crate::protocol::{ProtocolContext, StepCheck, StepCounter, StepOutcome};
use crate::request::AuthParams;
use crate::secret::SessionKey;
use crate::version::Version;

pub const CHALLENGE_SIZE: usize = 16;

const KEYS_INFO: &[u8] = b"pake v1 keys";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PakeV1Message {
    Start {
        #[serde(with = "serde_bytes")]
        auth_id: Vec<u8>,
    },
    Response {
        #[serde(with = "serde_bytes")]
        auth_id: Vec<u8>,
        #[serde(with = "serde_bytes")]
        salt: Vec<u8>,
        #[serde(with = "serde_bytes")]
        epk: Vec<u8>,
        #[serde(with = "serde_bytes")]
        challenge: Vec<u8>,
    },
    Confirm {
        #[serde(with = "serde_bytes")]
        epk: Vec<u8>,
        #[serde(with = "serde_bytes")]
        challenge: Vec<u8>,
        #[serde(with = "serde_bytes")]
        kcf: Vec<u8>,
        exchange: Option<SealedExchange>,
    },
    Result {
        #[serde(with = "serde_bytes")]
        kcf: Vec<u8>,
        exchange: Option<SealedExchange>,
    },
}

impl PakeV1Message {
    pub fn step(&self) -> u8 {
        match self {
            PakeV1Message::Start { .. } => 1,
            PakeV1Message::Response { .. } => 2,
            PakeV1Message::Confirm { .. } => 3,
            PakeV1Message::Result { .. } => 4,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PakeV1Task {
    pub(crate) version: Version,
    pub(crate) steps: StepCounter,
    os_account_id: i32,
    session: Option<PakeSessionParams>,
    peer_auth_id: Vec<u8>,
    salt: Vec<u8>,
    own_challenge: [u8; CHALLENGE_SIZE],
    peer_challenge: Vec<u8>,
    keys: Option<SessionKeys>,
}

impl PakeV1Task {
    pub fn new(params: &AuthParams, version: Version) -> Self {
        Self {
            version,
            steps: StepCounter::new(params.role),
            os_account_id: params.os_account_id,
            session: None,
            peer_auth_id: Vec::new(),
            salt: Vec::new(),
            own_challenge: [0; CHALLENGE_SIZE],
            peer_challenge: Vec::new(),
            keys: None,
        }
    }

    pub fn start<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<PakeV1Message, AuthError> {
        self.steps.sent(1);
        Ok(PakeV1Message::Start {
            auth_id: ctx.params.self_auth_id.clone(),
        })
    }

    pub fn process<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        message: &PakeV1Message,
    ) -> Result<StepOutcome, AuthError> {
        let step = message.step();
        if self.steps.check(step)? == StepCheck::Ignore {
            return Ok(StepOutcome::Ignore);
        }

        let outcome = match (ctx.params.is_client(), message) {
            (false, PakeV1Message::Start { auth_id }) => self.handle_start(ctx, auth_id)?,
            (
                true,
                PakeV1Message::Response {
                    auth_id,
                    salt,
                    epk,
                    challenge,
                },
            ) => self.handle_response(ctx, auth_id, salt, epk, challenge)?,
            (
                false,
                PakeV1Message::Confirm {
                    epk,
                    challenge,
                    kcf,
                    exchange,
                },
            ) => self.handle_confirm(ctx, epk, challenge, kcf, exchange.as_ref())?,
            (true, PakeV1Message::Result { kcf, exchange }) => {
                self.handle_result(ctx, kcf, exchange.as_ref())?
            }
            _ => return Err(AuthError::InvalidInput("unexpected pake v1 message")),
        };

        self.steps.advance(step, &outcome);
        Ok(outcome)
    }

    /// Server receives the client's identity and answers with its ephemeral key.
    fn handle_start<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        auth_id: &[u8],
    ) -> Result<StepOutcome, AuthError> {
        ctx.verify_peer(auth_id, None)?;
        self.peer_auth_id = auth_id.to_vec();

        self.salt = ctx
            .provider
            .random_vec(SALT_SIZE)
            .map_err(AuthError::crypto)?;
        self.own_challenge = RandProvider::random_array(ctx.provider).map_err(AuthError::crypto)?;

        let epk = self.generate_session(ctx)?;

        Ok(StepOutcome::Continue(
            PakeV1Message::Response {
                auth_id: ctx.params.self_auth_id.clone(),
                salt: self.salt.clone(),
                epk,
                challenge: self.own_challenge.to_vec(),
            }
            .into(),
        ))
    }

    /// Client agrees on the shared secret and confirms it.
    fn handle_response<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        auth_id: &[u8],
        salt: &[u8],
        epk: &[u8],
        challenge: &[u8],
    ) -> Result<StepOutcome, AuthError> {
        if salt.len() != SALT_SIZE {
            return Err(AuthError::InvalidInput("salt has invalid size"));
        }
        if challenge.len() != CHALLENGE_SIZE {
            return Err(AuthError::InvalidInput("challenge has invalid size"));
        }
        ctx.verify_peer(auth_id, None)?;
        self.peer_auth_id = auth_id.to_vec();
        self.salt = salt.to_vec();
        self.peer_challenge = challenge.to_vec();
        self.own_challenge = RandProvider::random_array(ctx.provider).map_err(AuthError::crypto)?;

        let public_key = self.generate_session(ctx)?;
        self.agree(ctx, epk)?;

        let kcf = self.confirmation(ctx, &self.own_challenge, &self.peer_challenge)?;
        let exchange = match ctx.params.op_code {
            OpCode::Bind => Some(seal_exchange(ctx, &self.keys()?.exchange_key)?),
            _ => None,
        };

        Ok(StepOutcome::Continue(
            PakeV1Message::Confirm {
                epk: public_key,
                challenge: self.own_challenge.to_vec(),
                kcf: kcf.to_vec(),
                exchange,
            }
            .into(),
        ))
    }

    /// Server checks the client's confirmation and finishes.
    fn handle_confirm<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        epk: &[u8],
        challenge: &[u8],
        kcf: &[u8],
        exchange: Option<&SealedExchange>,
    ) -> Result<StepOutcome, AuthError> {
        if challenge.len() != CHALLENGE_SIZE {
            return Err(AuthError::InvalidInput("challenge has invalid size"));
        }
        self.peer_challenge = challenge.to_vec();
        self.agree(ctx, epk)?;

        let expected = self.confirmation(ctx, &self.peer_challenge, &self.own_challenge)?;
        verify_confirmation(&expected, kcf)?;

        let exchange = match ctx.params.op_code {
            OpCode::Bind => {
                let sealed = exchange.ok_or(AuthError::InvalidInput("missing identity exchange"))?;
                let keys = self.keys()?;
                open_exchange(ctx, &keys.exchange_key, sealed, &self.peer_auth_id)?;
                Some(seal_exchange(ctx, &keys.exchange_key)?)
            }
            OpCode::Unbind => {
                finish_unbind(ctx, &self.peer_auth_id)?;
                None
            }
            OpCode::Authenticate => None,
        };

        let kcf = self.confirmation(ctx, &self.own_challenge, &self.peer_challenge)?;
        Ok(StepOutcome::Finish {
            send_to_peer: Some(
                PakeV1Message::Result {
                    kcf: kcf.to_vec(),
                    exchange,
                }
                .into(),
            ),
            session_key: self.session_key()?,
        })
    }

    /// Client checks the server's confirmation and finishes.
    fn handle_result<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        kcf: &[u8],
        exchange: Option<&SealedExchange>,
    ) -> Result<StepOutcome, AuthError> {
        let expected = self.confirmation(ctx, &self.peer_challenge, &self.own_challenge)?;
        verify_confirmation(&expected, kcf)?;

        match ctx.params.op_code {
            OpCode::Bind => {
                let sealed = exchange.ok_or(AuthError::InvalidInput("missing identity exchange"))?;
                open_exchange(ctx, &self.keys()?.exchange_key, sealed, &self.peer_auth_id)?;
            }
            OpCode::Unbind => finish_unbind(ctx, &self.peer_auth_id)?,
            OpCode::Authenticate => (),
        }

        Ok(StepOutcome::Finish {
            send_to_peer: None,
            session_key: self.session_key()?,
        })
    }

    /// Generates the own ephemeral key pair and returns its public key.
    fn generate_session<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<Vec<u8>, AuthError> {
        let curve = PakeCurve::for_pake_v1(self.version.patch).ok_or(AuthError::NotSupported)?;
        let psk = pake_psk(ctx, &self.peer_auth_id, &self.salt)?;
        let base_secret = pake_base_secret(ctx.provider, &self.salt, &psk)?;

        let mut session = PakeSessionParams::new(curve, self.os_account_id);
        generate_pake_params(ctx.provider, &mut session, base_secret.as_bytes())?;
        debug!(?curve, "generated pake v1 params");

        let public_key = session.public_key.clone();
        self.session = Some(session);
        Ok(public_key)
    }

    fn agree<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        epk: &[u8],
    ) -> Result<(), AuthError> {
        let session = self
            .session
            .as_mut()
            .ok_or(AuthError::InvalidInput("pake v1 session not started"))?;
        agree_shared_secret(ctx.provider, session, epk)?;

        let shared_secret = session
            .shared_secret()
            .ok_or(AuthError::InvalidPublicKey)?;
        let (client_epk, server_epk) = if ctx.params.is_client() {
            (session.public_key.as_slice(), epk)
        } else {
            (epk, session.public_key.as_slice())
        };
        let salt = [self.salt.as_slice(), client_epk, server_epk].concat();
        self.keys = Some(SessionKeys::derive(
            ctx.provider,
            &salt,
            shared_secret,
            KEYS_INFO,
        )?);
        Ok(())
    }

    fn keys(&self) -> Result<&SessionKeys, AuthError> {
        self.keys
            .as_ref()
            .ok_or(AuthError::InvalidInput("pake v1 keys not agreed"))
    }

    fn confirmation<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
        first: &[u8],
        second: &[u8],
    ) -> Result<[u8; HMAC_SIZE], AuthError> {
        ctx.provider
            .hmac(self.keys()?.confirmation_key.as_bytes(), &[first, second])
            .map_err(AuthError::crypto)
    }

    fn session_key(&self) -> Result<SessionKey, AuthError> {
        Ok(SessionKey::from_secret(self.keys()?.session_key.clone()))
    }
}
