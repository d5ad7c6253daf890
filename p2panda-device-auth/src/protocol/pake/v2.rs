// SPDX-License-Identifier: MIT OR Apache-2.0

//! PAKE v2, running over Ristretto255 only.
//!
//! Compared to the first version both sides declare their user type, and key confirmation covers
//! a transcript of the whole exchange instead of separate challenges:
//!
//! ```text
//! client                                          server
//!   | -- 1 Start { auth_id, user_type } --------------> |
//!   | <-- 2 Response { auth_id, user_type, salt, epk } - |
//!   | -- 3 Confirm { epk, kcf, exchange? } ------------> |
//!   | <-- 4 Result { kcf, exchange? } ------------------ |
//! ```
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::hkdf::HMAC_SIZE;
use crate::crypto::sha2::SHA256_DIGEST_SIZE;
use crate::crypto::{CryptoProvider, Platform};
use crate::error::AuthError;
use crate::identity::UserType;
use crate::message::OpCode;
use crate::protocol::pake::{
    PakeCurve, PakeSessionParams, SALT_SIZE, SealedExchange, SessionKeys, agree_shared_secret,
    finish_unbind, generate_pake_params, open_exchange, pake_base_secret, pake_psk,
    seal_exchange, verify_confirmation,
};
use crate::protocol::{ProtocolContext, StepCheck, StepCounter, StepOutcome};
use crate::request::AuthParams;
use crate::secret::SessionKey;
use crate::version::{AlgorithmMask, Version};

const KEYS_INFO: &[u8] = b"pake v2 keys";

const CLIENT_LABEL: &[u8] = b"client";

const SERVER_LABEL: &[u8] = b"server";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PakeV2Message {
    Start {
        #[serde(with = "serde_bytes")]
        auth_id: Vec<u8>,
        user_type: UserType,
    },
    Response {
        #[serde(with = "serde_bytes")]
        auth_id: Vec<u8>,
        user_type: UserType,
        #[serde(with = "serde_bytes")]
        salt: Vec<u8>,
        #[serde(with = "serde_bytes")]
        epk: Vec<u8>,
    },
    Confirm {
        #[serde(with = "serde_bytes")]
        epk: Vec<u8>,
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

impl PakeV2Message {
    pub fn step(&self) -> u8 {
        match self {
            PakeV2Message::Start { .. } => 1,
            PakeV2Message::Response { .. } => 2,
            PakeV2Message::Confirm { .. } => 3,
            PakeV2Message::Result { .. } => 4,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PakeV2Task {
    pub(crate) version: Version,
    pub(crate) steps: StepCounter,
    os_account_id: i32,
    session: Option<PakeSessionParams>,
    peer_auth_id: Vec<u8>,
    salt: Vec<u8>,
    transcript: [u8; SHA256_DIGEST_SIZE],
    keys: Option<SessionKeys>,
}

impl PakeV2Task {
    pub fn new(params: &AuthParams, version: Version) -> Self {
        Self {
            version,
            steps: StepCounter::new(params.role),
            os_account_id: params.os_account_id,
            session: None,
            peer_auth_id: Vec::new(),
            salt: Vec::new(),
            transcript: [0; SHA256_DIGEST_SIZE],
            keys: None,
        }
    }

    pub fn start<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<PakeV2Message, AuthError> {
        self.steps.sent(1);
        Ok(PakeV2Message::Start {
            auth_id: ctx.params.self_auth_id.clone(),
            user_type: ctx.params.self_user_type,
        })
    }

    pub fn process<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        message: &PakeV2Message,
    ) -> Result<StepOutcome, AuthError> {
        let step = message.step();
        if self.steps.check(step)? == StepCheck::Ignore {
            return Ok(StepOutcome::Ignore);
        }

        let outcome = match (ctx.params.is_client(), message) {
            (false, PakeV2Message::Start { auth_id, user_type }) => {
                self.handle_start(ctx, auth_id, *user_type)?
            }
            (
                true,
                PakeV2Message::Response {
                    auth_id,
                    user_type,
                    salt,
                    epk,
                },
            ) => self.handle_response(ctx, auth_id, *user_type, salt, epk)?,
            (false, PakeV2Message::Confirm { epk, kcf, exchange }) => {
                self.handle_confirm(ctx, epk, kcf, exchange.as_ref())?
            }
            (true, PakeV2Message::Result { kcf, exchange }) => {
                self.handle_result(ctx, kcf, exchange.as_ref())?
            }
            _ => return Err(AuthError::InvalidInput("unexpected pake v2 message")),
        };

        self.steps.advance(step, &outcome);
        Ok(outcome)
    }

    fn handle_start<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        auth_id: &[u8],
        user_type: UserType,
    ) -> Result<StepOutcome, AuthError> {
        ctx.verify_peer(auth_id, Some(user_type))?;
        self.peer_auth_id = auth_id.to_vec();
        self.salt = ctx
            .provider
            .random_vec(SALT_SIZE)
            .map_err(AuthError::crypto)?;

        let epk = self.generate_session(ctx)?;
        Ok(StepOutcome::Continue(
            PakeV2Message::Response {
                auth_id: ctx.params.self_auth_id.clone(),
                user_type: ctx.params.self_user_type,
                salt: self.salt.clone(),
                epk,
            }
            .into(),
        ))
    }

    fn handle_response<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        auth_id: &[u8],
        user_type: UserType,
        salt: &[u8],
        epk: &[u8],
    ) -> Result<StepOutcome, AuthError> {
        if salt.len() != SALT_SIZE {
            return Err(AuthError::InvalidInput("salt has invalid size"));
        }
        ctx.verify_peer(auth_id, Some(user_type))?;
        self.peer_auth_id = auth_id.to_vec();
        self.salt = salt.to_vec();

        let public_key = self.generate_session(ctx)?;
        self.agree(ctx, epk)?;

        let kcf = self.confirmation(ctx, CLIENT_LABEL)?;
        let exchange = match ctx.params.op_code {
            OpCode::Bind => Some(seal_exchange(ctx, &self.keys()?.exchange_key)?),
            _ => None,
        };

        Ok(StepOutcome::Continue(
            PakeV2Message::Confirm {
                epk: public_key,
                kcf: kcf.to_vec(),
                exchange,
            }
            .into(),
        ))
    }

    fn handle_confirm<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        epk: &[u8],
        kcf: &[u8],
        exchange: Option<&SealedExchange>,
    ) -> Result<StepOutcome, AuthError> {
        self.agree(ctx, epk)?;
        verify_confirmation(&self.confirmation(ctx, CLIENT_LABEL)?, kcf)?;

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

        Ok(StepOutcome::Finish {
            send_to_peer: Some(
                PakeV2Message::Result {
                    kcf: self.confirmation(ctx, SERVER_LABEL)?.to_vec(),
                    exchange,
                }
                .into(),
            ),
            session_key: self.session_key()?,
        })
    }

    fn handle_result<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        kcf: &[u8],
        exchange: Option<&SealedExchange>,
    ) -> Result<StepOutcome, AuthError> {
        verify_confirmation(&self.confirmation(ctx, SERVER_LABEL)?, kcf)?;

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

    fn generate_session<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<Vec<u8>, AuthError> {
        if !self.version.patch.contains(AlgorithmMask::EC_PAKE_V2) {
            return Err(AuthError::NotSupported);
        }
        let psk = pake_psk(ctx, &self.peer_auth_id, &self.salt)?;
        let base_secret = pake_base_secret(ctx.provider, &self.salt, &psk)?;

        let mut session = PakeSessionParams::new(PakeCurve::Ristretto255, self.os_account_id);
        generate_pake_params(ctx.provider, &mut session, base_secret.as_bytes())?;
        debug!("generated pake v2 params");

        let public_key = session.public_key.clone();
        self.session = Some(session);
        Ok(public_key)
    }

    /// Agrees on the shared secret and derives all keys from it, bound to the transcript.
    fn agree<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        epk: &[u8],
    ) -> Result<(), AuthError> {
        let session = self
            .session
            .as_mut()
            .ok_or(AuthError::InvalidInput("pake v2 session not started"))?;
        agree_shared_secret(ctx.provider, session, epk)?;

        let own_auth_id = ctx.params.self_auth_id.as_slice();
        let peer_auth_id = self.peer_auth_id.as_slice();
        let own_epk = session.public_key.as_slice();
        let (auth_c, auth_s, epk_c, epk_s) = if ctx.params.is_client() {
            (own_auth_id, peer_auth_id, own_epk, epk)
        } else {
            (peer_auth_id, own_auth_id, epk, own_epk)
        };
        self.transcript = transcript_hash(
            ctx,
            &[self.salt.as_slice(), auth_c, auth_s, epk_c, epk_s],
        )?;

        let shared_secret = session
            .shared_secret()
            .ok_or(AuthError::InvalidPublicKey)?;
        self.keys = Some(SessionKeys::derive(
            ctx.provider,
            &self.transcript,
            shared_secret,
            KEYS_INFO,
        )?);
        Ok(())
    }

    fn keys(&self) -> Result<&SessionKeys, AuthError> {
        self.keys
            .as_ref()
            .ok_or(AuthError::InvalidInput("pake v2 keys not agreed"))
    }

    fn confirmation<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
        label: &[u8],
    ) -> Result<[u8; HMAC_SIZE], AuthError> {
        ctx.provider
            .hmac(
                self.keys()?.confirmation_key.as_bytes(),
                &[label, &self.transcript],
            )
            .map_err(AuthError::crypto)
    }

    fn session_key(&self) -> Result<SessionKey, AuthError> {
        Ok(SessionKey::from_secret(self.keys()?.session_key.clone()))
    }
}

/// SHA-256 over length-prefixed parts, so no two different transcripts hash the same input.
fn transcript_hash<P: Platform>(
    ctx: &ProtocolContext<'_, P>,
    parts: &[&[u8]],
) -> Result<[u8; SHA256_DIGEST_SIZE], AuthError> {
    let mut input = Vec::new();
    for part in parts {
        input.extend_from_slice(&(part.len() as u32).to_be_bytes());
        input.extend_from_slice(part);
    }
    CryptoProvider::sha256(ctx.provider, &[&input]).map_err(AuthError::crypto)
}

#[cfg(test)]
mod tests {
    use crate::crypto::Provider;
    use crate::error::AuthError;
    use crate::identity::{MemoryIdentityStore, UserType};
    use crate::message::{OpCode, ProtocolMessage};
    use crate::protocol::{ProtocolContext, StepOutcome};
    use crate::request::{AuthParams, AuthRequest, Role};
    use crate::token::StandardTokenManager;
    use crate::version::{AlgorithmMask, Version};

    use super::{PakeV2Message, PakeV2Task};

    fn params(role: Role, auth_id: &[u8]) -> AuthParams {
        let request =
            AuthRequest::new(OpCode::Bind, "org.p2panda.test", "lights", auth_id).with_pin("4711");
        AuthParams::new(role, request)
    }

    fn context<'a>(
        provider: &'a Provider,
        identities: &'a MemoryIdentityStore,
        params: &'a AuthParams,
    ) -> ProtocolContext<'a, Provider> {
        ProtocolContext {
            provider,
            token_manager: &StandardTokenManager,
            identities,
            params,
        }
    }

    fn expect_message(outcome: StepOutcome) -> PakeV2Message {
        match outcome {
            StepOutcome::Continue(ProtocolMessage::PakeV2(message)) => message,
            outcome => panic!("unexpected outcome {outcome:?}"),
        }
    }

    #[test]
    fn tampered_salt_fails_confirmation() {
        let client_provider = Provider::from_seed([1; 32]);
        let server_provider = Provider::from_seed([2; 32]);
        let identities = MemoryIdentityStore::new();
        let client_params = params(Role::Client, b"client");
        let server_params = params(Role::Server, b"server");
        let client_ctx = context(&client_provider, &identities, &client_params);
        let server_ctx = context(&server_provider, &identities, &server_params);

        let version = Version::new(2, 0, AlgorithmMask::EC_PAKE_V2);
        let mut client = PakeV2Task::new(&client_params, version);
        let mut server = PakeV2Task::new(&server_params, version);

        let start = client.start(&client_ctx).unwrap();
        let mut response = expect_message(server.process(&server_ctx, &start).unwrap());
        if let PakeV2Message::Response { salt, .. } = &mut response {
            salt[0] ^= 1;
        }

        let confirm = expect_message(client.process(&client_ctx, &response).unwrap());
        assert!(matches!(
            server.process(&server_ctx, &confirm),
            Err(AuthError::ConfirmationMismatch)
        ));

        // Nothing about the client was persisted.
        assert_eq!(server_provider.key_count(), 0);
    }

    #[test]
    fn needs_ec_pake_v2_algorithm() {
        let provider = Provider::from_seed([1; 32]);
        let identities = MemoryIdentityStore::new();
        let server_params = params(Role::Server, b"server");
        let ctx = context(&provider, &identities, &server_params);

        let mut server =
            PakeV2Task::new(&server_params, Version::new(2, 0, AlgorithmMask::EC_PAKE_V1));
        let start = PakeV2Message::Start {
            auth_id: b"client".to_vec(),
            user_type: UserType::Controller,
        };
        assert!(matches!(
            server.process(&ctx, &start),
            Err(AuthError::NotSupported)
        ));
    }
}
