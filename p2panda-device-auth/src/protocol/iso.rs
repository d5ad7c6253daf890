// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symmetric challenge-response authentication.
//!
//! Both sides prove knowledge of a shared key by MACing each other's random challenges. While
//! binding that key is the hashed PIN and the client hands a fresh authentication code to the
//! server, encrypted under the session key. Afterwards the authentication code is the shared key.
//!
//! ```text
//! client                                       server
//!   | -- 1 Start { auth_id, rand } --------------> |
//!   | <-- 2 Response { auth_id, rand, token } ---- |
//!   | -- 3 Confirm { token, auth_code? } --------> |
//!   | <-- 4 Result { mac } ----------------------- |
//! ```
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::aead::{AEAD_KEY_SIZE, AeadNonce};
use crate::crypto::hkdf::HMAC_SIZE;
use crate::crypto::{CryptoProvider, Platform, RandProvider};
use crate::error::AuthError;
use crate::key_alias::{KeyAlias, KeyPurpose};
use crate::message::OpCode;
use crate::protocol::pake::verify_confirmation;
use crate::protocol::{ProtocolContext, StepCheck, StepCounter, StepOutcome};
use crate::request::AuthParams;
use crate::secret::{Secret, SecretBytes, SessionKey};
use crate::version::Version;

pub const RANDOM_SIZE: usize = 16;

pub const AUTH_CODE_SIZE: usize = 32;

const SESSION_KEY_INFO: &[u8] = b"iso session key";

const AUTH_CODE_KEY_INFO: &[u8] = b"iso auth code key";

const AUTH_CODE_AAD: &[u8] = b"p2panda-device-auth iso auth code";

const RESULT_LABEL: &[u8] = b"iso result";

/// Authentication code encrypted for the server while binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedAuthCode {
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsoMessage {
    Start {
        #[serde(with = "serde_bytes")]
        auth_id: Vec<u8>,
        #[serde(with = "serde_bytes")]
        rand: Vec<u8>,
    },
    Response {
        #[serde(with = "serde_bytes")]
        auth_id: Vec<u8>,
        #[serde(with = "serde_bytes")]
        rand: Vec<u8>,
        #[serde(with = "serde_bytes")]
        token: Vec<u8>,
    },
    Confirm {
        #[serde(with = "serde_bytes")]
        token: Vec<u8>,
        auth_code: Option<SealedAuthCode>,
    },
    Result {
        #[serde(with = "serde_bytes")]
        mac: Vec<u8>,
    },
}

impl IsoMessage {
    pub fn step(&self) -> u8 {
        match self {
            IsoMessage::Start { .. } => 1,
            IsoMessage::Response { .. } => 2,
            IsoMessage::Confirm { .. } => 3,
            IsoMessage::Result { .. } => 4,
        }
    }
}

#[derive(Debug)]
pub(crate) struct IsoTask {
    pub(crate) version: Version,
    pub(crate) steps: StepCounter,
    peer_auth_id: Vec<u8>,
    rand_client: Vec<u8>,
    rand_server: Vec<u8>,
    psk: Option<SecretBytes>,
    session_key: Option<Secret<AEAD_KEY_SIZE>>,

    /// Authentication code generated by the client, persisted once the server confirmed.
    auth_code: Option<Secret<AUTH_CODE_SIZE>>,
}

impl IsoTask {
    pub fn new(params: &AuthParams, version: Version) -> Self {
        Self {
            version,
            steps: StepCounter::new(params.role),
            peer_auth_id: Vec::new(),
            rand_client: Vec::new(),
            rand_server: Vec::new(),
            psk: None,
            session_key: None,
            auth_code: None,
        }
    }

    pub fn start<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<IsoMessage, AuthError> {
        self.rand_client = ctx
            .provider
            .random_vec(RANDOM_SIZE)
            .map_err(AuthError::crypto)?;
        self.steps.sent(1);
        Ok(IsoMessage::Start {
            auth_id: ctx.params.self_auth_id.clone(),
            rand: self.rand_client.clone(),
        })
    }

    pub fn process<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        message: &IsoMessage,
    ) -> Result<StepOutcome, AuthError> {
        let step = message.step();
        if self.steps.check(step)? == StepCheck::Ignore {
            return Ok(StepOutcome::Ignore);
        }

        let outcome = match (ctx.params.is_client(), message) {
            (false, IsoMessage::Start { auth_id, rand }) => {
                self.handle_start(ctx, auth_id, rand)?
            }
            (
                true,
                IsoMessage::Response {
                    auth_id,
                    rand,
                    token,
                },
            ) => self.handle_response(ctx, auth_id, rand, token)?,
            (false, IsoMessage::Confirm { token, auth_code }) => {
                self.handle_confirm(ctx, token, auth_code.as_ref())?
            }
            (true, IsoMessage::Result { mac }) => self.handle_result(ctx, mac)?,
            _ => return Err(AuthError::InvalidInput("unexpected iso message")),
        };

        self.steps.advance(step, &outcome);
        Ok(outcome)
    }

    fn handle_start<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        auth_id: &[u8],
        rand: &[u8],
    ) -> Result<StepOutcome, AuthError> {
        if rand.len() != RANDOM_SIZE {
            return Err(AuthError::InvalidInput("iso random has invalid size"));
        }
        ctx.verify_peer(auth_id, None)?;
        self.peer_auth_id = auth_id.to_vec();
        self.rand_client = rand.to_vec();
        self.rand_server = ctx
            .provider
            .random_vec(RANDOM_SIZE)
            .map_err(AuthError::crypto)?;
        self.psk = Some(self.compute_psk(ctx)?);

        let token = self.token(
            ctx,
            &self.rand_server,
            &self.rand_client,
            &ctx.params.self_auth_id,
            &self.peer_auth_id,
        )?;
        Ok(StepOutcome::Continue(
            IsoMessage::Response {
                auth_id: ctx.params.self_auth_id.clone(),
                rand: self.rand_server.clone(),
                token: token.to_vec(),
            }
            .into(),
        ))
    }

    fn handle_response<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        auth_id: &[u8],
        rand: &[u8],
        token: &[u8],
    ) -> Result<StepOutcome, AuthError> {
        if rand.len() != RANDOM_SIZE {
            return Err(AuthError::InvalidInput("iso random has invalid size"));
        }
        ctx.verify_peer(auth_id, None)?;
        self.peer_auth_id = auth_id.to_vec();
        self.rand_server = rand.to_vec();
        self.psk = Some(self.compute_psk(ctx)?);

        let expected = self.token(
            ctx,
            &self.rand_server,
            &self.rand_client,
            &self.peer_auth_id,
            &ctx.params.self_auth_id,
        )?;
        verify_confirmation(&expected, token)?;

        let token = self.token(
            ctx,
            &self.rand_client,
            &self.rand_server,
            &ctx.params.self_auth_id,
            &self.peer_auth_id,
        )?;
        self.derive_session_key(ctx)?;

        let auth_code = match ctx.params.op_code {
            OpCode::Bind => {
                let auth_code = Secret::from_bytes(
                    RandProvider::random_array(ctx.provider).map_err(AuthError::crypto)?,
                );
                let sealed = self.seal_auth_code(ctx, &auth_code)?;
                self.auth_code = Some(auth_code);
                Some(sealed)
            }
            _ => None,
        };

        Ok(StepOutcome::Continue(
            IsoMessage::Confirm {
                token: token.to_vec(),
                auth_code,
            }
            .into(),
        ))
    }

    fn handle_confirm<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        token: &[u8],
        auth_code: Option<&SealedAuthCode>,
    ) -> Result<StepOutcome, AuthError> {
        let expected = self.token(
            ctx,
            &self.rand_client,
            &self.rand_server,
            &self.peer_auth_id,
            &ctx.params.self_auth_id,
        )?;
        verify_confirmation(&expected, token)?;
        self.derive_session_key(ctx)?;

        match ctx.params.op_code {
            OpCode::Bind => {
                let sealed =
                    auth_code.ok_or(AuthError::InvalidInput("missing iso auth code"))?;
                let auth_code = self.open_auth_code(ctx, sealed)?;
                self.persist_auth_code(ctx, &auth_code)?;
            }
            OpCode::Unbind => self.delete_auth_code(ctx)?,
            OpCode::Authenticate => (),
        }

        Ok(StepOutcome::Finish {
            send_to_peer: Some(
                IsoMessage::Result {
                    mac: self.result_mac(ctx)?.to_vec(),
                }
                .into(),
            ),
            session_key: self.session_key()?,
        })
    }

    fn handle_result<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
        mac: &[u8],
    ) -> Result<StepOutcome, AuthError> {
        verify_confirmation(&self.result_mac(ctx)?, mac)?;

        match ctx.params.op_code {
            OpCode::Bind => {
                let auth_code = self
                    .auth_code
                    .take()
                    .ok_or(AuthError::InvalidInput("iso auth code not generated"))?;
                self.persist_auth_code(ctx, &auth_code)?;
            }
            OpCode::Unbind => self.delete_auth_code(ctx)?,
            OpCode::Authenticate => (),
        }

        Ok(StepOutcome::Finish {
            send_to_peer: None,
            session_key: self.session_key()?,
        })
    }

    /// Key both sides prove knowledge of.
    ///
    /// While binding this is the hashed PIN, otherwise a MAC over both challenges computed inside
    /// the key store with the authentication code imported during binding.
    fn compute_psk<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<SecretBytes, AuthError> {
        match ctx.params.op_code {
            OpCode::Bind => {
                let pin = ctx
                    .params
                    .pin
                    .as_ref()
                    .ok_or(AuthError::InvalidInput("binding requires a pin"))?;
                let digest = CryptoProvider::sha256(ctx.provider, &[pin.as_bytes()])
                    .map_err(AuthError::crypto)?;
                Ok(SecretBytes::from_slice(&digest))
            }
            OpCode::Authenticate | OpCode::Unbind => {
                let mac = ctx
                    .provider
                    .hmac_with_alias(
                        &self.auth_code_alias(ctx),
                        &[self.rand_client.as_slice(), self.rand_server.as_slice()],
                    )
                    .map_err(AuthError::crypto)?;
                Ok(SecretBytes::from_slice(&mac))
            }
        }
    }

    fn token<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
        first_rand: &[u8],
        second_rand: &[u8],
        first_auth_id: &[u8],
        second_auth_id: &[u8],
    ) -> Result<[u8; HMAC_SIZE], AuthError> {
        let psk = self
            .psk
            .as_ref()
            .ok_or(AuthError::InvalidInput("iso psk not computed"))?;
        ctx.provider
            .hmac(
                psk.as_bytes(),
                &[first_rand, second_rand, first_auth_id, second_auth_id],
            )
            .map_err(AuthError::crypto)
    }

    fn derive_session_key<P: Platform>(
        &mut self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<(), AuthError> {
        let psk = self
            .psk
            .as_ref()
            .ok_or(AuthError::InvalidInput("iso psk not computed"))?;
        let salt = [self.rand_client.as_slice(), &self.rand_server].concat();
        let key = ctx
            .provider
            .hkdf(&salt, psk.as_bytes(), Some(SESSION_KEY_INFO))
            .map_err(AuthError::crypto)?;
        self.session_key = Some(Secret::from_bytes(key));
        Ok(())
    }

    fn auth_code_key<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<Secret<AEAD_KEY_SIZE>, AuthError> {
        let session_key = self
            .session_key
            .as_ref()
            .ok_or(AuthError::InvalidInput("iso session key not derived"))?;
        let key = ctx
            .provider
            .hkdf(&[], session_key.as_bytes(), Some(AUTH_CODE_KEY_INFO))
            .map_err(AuthError::crypto)?;
        Ok(Secret::from_bytes(key))
    }

    fn seal_auth_code<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
        auth_code: &Secret<AUTH_CODE_SIZE>,
    ) -> Result<SealedAuthCode, AuthError> {
        let key = self.auth_code_key(ctx)?;
        let nonce: AeadNonce = RandProvider::random_array(ctx.provider).map_err(AuthError::crypto)?;
        let ciphertext = ctx
            .provider
            .aead_encrypt(
                key.as_bytes(),
                auth_code.as_bytes(),
                nonce,
                Some(AUTH_CODE_AAD),
            )
            .map_err(AuthError::crypto)?;
        Ok(SealedAuthCode {
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    fn open_auth_code<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
        sealed: &SealedAuthCode,
    ) -> Result<Secret<AUTH_CODE_SIZE>, AuthError> {
        let nonce: AeadNonce = sealed
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::InvalidInput("iso nonce has invalid size"))?;
        let key = self.auth_code_key(ctx)?;
        let plaintext = SecretBytes::from_vec(
            ctx.provider
                .aead_decrypt(
                    key.as_bytes(),
                    &sealed.ciphertext,
                    nonce,
                    Some(AUTH_CODE_AAD),
                )
                .map_err(AuthError::crypto)?,
        );
        let auth_code: [u8; AUTH_CODE_SIZE] = plaintext
            .as_bytes()
            .try_into()
            .map_err(|_| AuthError::InvalidInput("iso auth code has invalid size"))?;
        Ok(Secret::from_bytes(auth_code))
    }

    fn persist_auth_code<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
        auth_code: &Secret<AUTH_CODE_SIZE>,
    ) -> Result<(), AuthError> {
        let alias = self.auth_code_alias(ctx);
        ctx.provider
            .import_symmetric_key(&alias, auth_code.as_bytes())
            .map_err(AuthError::crypto)?;
        debug!(%alias, "persisted iso auth code");
        Ok(())
    }

    fn delete_auth_code<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<(), AuthError> {
        ctx.token_manager.delete_peer_auth_info(
            ctx.provider,
            &ctx.params.peer_token_params(&self.peer_auth_id),
        )
    }

    fn auth_code_alias<P>(&self, ctx: &ProtocolContext<'_, P>) -> KeyAlias {
        ctx.params
            .peer_token_params(&self.peer_auth_id)
            .alias(KeyPurpose::AuthToken)
    }

    fn result_mac<P: Platform>(
        &self,
        ctx: &ProtocolContext<'_, P>,
    ) -> Result<[u8; HMAC_SIZE], AuthError> {
        let session_key = self
            .session_key
            .as_ref()
            .ok_or(AuthError::InvalidInput("iso session key not derived"))?;
        ctx.provider
            .hmac(
                session_key.as_bytes(),
                &[
                    RESULT_LABEL,
                    self.rand_client.as_slice(),
                    self.rand_server.as_slice(),
                ],
            )
            .map_err(AuthError::crypto)
    }

    fn session_key(&self) -> Result<SessionKey, AuthError> {
        let session_key = self
            .session_key
            .clone()
            .ok_or(AuthError::InvalidInput("iso session key not derived"))?;
        Ok(SessionKey::from_secret(session_key))
    }
}
