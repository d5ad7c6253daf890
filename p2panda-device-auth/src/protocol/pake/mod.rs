// SPDX-License-Identifier: MIT OR Apache-2.0

//! Password-authenticated key exchange shared by both PAKE protocol versions.
//!
//! Both sides derive a group generator from a secret only they know (the PIN while binding, the
//! pre-shared key persisted during binding otherwise). Ephemeral keys are computed relative to
//! that generator, so only a peer knowing the same secret ends up with the same shared secret.
//!
//! Two group families are supported, elliptic curve (Ristretto255) and discrete log (RFC 3526
//! MODP groups). They expose the same operations over different key sizes and validation rules.
//!
//! While binding, the key-confirmation messages additionally carry each side's long-term identity
//! public key, sealed under a key derived from the PAKE result.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::cbor::{decode_cbor, encode_cbor};
use crate::crypto::aead::{AEAD_KEY_SIZE, AeadNonce};
use crate::crypto::modp::{MODP_2048_PRIME, MODP_3072_PRIME, prime_bytes};
use crate::crypto::ristretto::{POINT_SIZE, SCALAR_SIZE};
use crate::crypto::{CryptoProvider, Platform, RandProvider};
use crate::error::AuthError;
use crate::key_alias::KeyPurpose;
use crate::message::OpCode;
use crate::protocol::ProtocolContext;
use crate::secret::{Secret, SecretBytes};
use crate::version::AlgorithmMask;

pub mod v1;
pub mod v2;

/// Size of the random salt the server contributes.
pub const SALT_SIZE: usize = 16;

/// Size of the secret exponent in the discrete-log groups.
const DL_SECRET_SIZE: usize = 32;

/// Size of the secret the generator is derived from.
const BASE_SECRET_SIZE: usize = 32;

const PAKE_BASE_INFO: &[u8] = b"pake base";

/// Additional data authenticated with sealed identity exchanges.
const EXCHANGE_AAD: &[u8] = b"p2panda-device-auth exchange";

/// Group a PAKE session runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PakeCurve {
    Ristretto255,
    Modp2048,
    Modp3072,
}

impl PakeCurve {
    /// Strongest group PAKE v1 can run with the given algorithms.
    pub fn for_pake_v1(algorithms: AlgorithmMask) -> Option<Self> {
        if algorithms.contains(AlgorithmMask::EC_PAKE_V1) {
            Some(PakeCurve::Ristretto255)
        } else if algorithms.contains(AlgorithmMask::DL_PAKE_V1_3072) {
            Some(PakeCurve::Modp3072)
        } else if algorithms.contains(AlgorithmMask::DL_PAKE_V1_2048) {
            Some(PakeCurve::Modp2048)
        } else {
            None
        }
    }

    /// Size of an encoded public key.
    pub fn key_size(&self) -> usize {
        match self {
            PakeCurve::Ristretto255 => POINT_SIZE,
            PakeCurve::Modp2048 => 256,
            PakeCurve::Modp3072 => 384,
        }
    }

    fn prime(&self) -> Option<&'static str> {
        match self {
            PakeCurve::Ristretto255 => None,
            PakeCurve::Modp2048 => Some(MODP_2048_PRIME),
            PakeCurve::Modp3072 => Some(MODP_3072_PRIME),
        }
    }
}

/// Ephemeral key material of one PAKE session.
///
/// The secret key never leaves this struct and is wiped together with the shared secret when the
/// session is dropped.
#[derive(Debug)]
pub struct PakeSessionParams {
    pub curve: PakeCurve,
    pub os_account_id: i32,
    secret_key: Option<Secret<SCALAR_SIZE>>,
    pub public_key: Vec<u8>,
    pub peer_public_key: Vec<u8>,
    shared_secret: Option<SecretBytes>,
}

impl PakeSessionParams {
    pub fn new(curve: PakeCurve, os_account_id: i32) -> Self {
        Self {
            curve,
            os_account_id,
            secret_key: None,
            public_key: Vec::new(),
            peer_public_key: Vec::new(),
            shared_secret: None,
        }
    }

    pub fn shared_secret(&self) -> Option<&SecretBytes> {
        self.shared_secret.as_ref()
    }
}

/// Generates an ephemeral key pair relative to a generator derived from the secret.
pub fn generate_pake_params<P: Platform>(
    provider: &P,
    params: &mut PakeSessionParams,
    secret: &[u8],
) -> Result<(), AuthError> {
    let secret_key = Secret::from_bytes(
        RandProvider::random_array::<SCALAR_SIZE>(provider).map_err(AuthError::crypto)?,
    );

    let public_key = match params.curve.prime() {
        None => {
            let base = provider.hash_to_point(secret).map_err(AuthError::crypto)?;
            provider
                .point_mul(secret_key.as_bytes(), &base)
                .map_err(AuthError::crypto)?
                .to_vec()
        }
        Some(prime) => {
            let prime = prime_bytes(prime).map_err(AuthError::crypto)?;
            let base = hash_to_group(provider, &prime, secret)?;
            let exponent = &secret_key.as_bytes()[..DL_SECRET_SIZE];
            if exponent.iter().all(|byte| *byte == 0) {
                return Err(AuthError::Crypto("zero exponent".into()));
            }
            provider
                .big_num_exp_mod(&base, exponent, &prime)
                .map_err(AuthError::crypto)?
        }
    };

    params.secret_key = Some(secret_key);
    params.public_key = public_key;
    params.shared_secret = None;
    Ok(())
}

/// Validates the peer's ephemeral public key and agrees on the shared secret.
///
/// Keys of the wrong size, points which are not canonical or the identity and discrete-log keys
/// outside of `1 < key < p - 1` are rejected before any arithmetic with them. On failure no shared
/// secret is stored.
pub fn agree_shared_secret<P: Platform>(
    provider: &P,
    params: &mut PakeSessionParams,
    peer_public_key: &[u8],
) -> Result<(), AuthError> {
    if peer_public_key.len() != params.curve.key_size() {
        return Err(AuthError::InvalidPublicKey);
    }

    let secret_key = params
        .secret_key
        .as_ref()
        .ok_or_else(|| AuthError::Crypto("pake params not generated".into()))?;

    let shared_secret = match params.curve.prime() {
        None => {
            if !provider.is_valid_point(peer_public_key) {
                return Err(AuthError::InvalidPublicKey);
            }
            let shared = provider
                .point_mul(secret_key.as_bytes(), peer_public_key)
                .map_err(|_| AuthError::InvalidPublicKey)?;
            SecretBytes::from_slice(&shared)
        }
        Some(prime) => {
            let prime = prime_bytes(prime).map_err(AuthError::crypto)?;
            if !is_valid_group_element(provider, &prime, peer_public_key) {
                return Err(AuthError::InvalidPublicKey);
            }
            let shared = provider
                .big_num_exp_mod(
                    peer_public_key,
                    &secret_key.as_bytes()[..DL_SECRET_SIZE],
                    &prime,
                )
                .map_err(AuthError::crypto)?;
            SecretBytes::from_vec(shared)
        }
    };

    params.peer_public_key = peer_public_key.to_vec();
    params.shared_secret = Some(shared_secret);
    Ok(())
}

/// Maps a secret into the prime-order subgroup of a safe-prime MODP group by squaring its hash.
fn hash_to_group<P: Platform>(
    provider: &P,
    prime: &[u8],
    secret: &[u8],
) -> Result<Vec<u8>, AuthError> {
    let digest = CryptoProvider::sha256(provider, &[secret]).map_err(AuthError::crypto)?;
    let base = provider
        .big_num_exp_mod(&digest, &[2], prime)
        .map_err(AuthError::crypto)?;
    if !is_valid_group_element(provider, prime, &base) {
        return Err(AuthError::Crypto("degenerate generator".into()));
    }
    Ok(base)
}

/// True if `1 < key < p - 1`.
fn is_valid_group_element<P: Platform>(provider: &P, prime: &[u8], key: &[u8]) -> bool {
    let mut prime_minus_one = prime.to_vec();
    decrement(&mut prime_minus_one);
    provider.big_num_compare(key, &[1]) == Ordering::Greater
        && provider.big_num_compare(key, &prime_minus_one) == Ordering::Less
}

/// Subtracts one from an unsigned big-endian number larger than zero.
fn decrement(number: &mut [u8]) {
    for byte in number.iter_mut().rev() {
        let (value, borrow) = byte.overflowing_sub(1);
        *byte = value;
        if !borrow {
            break;
        }
    }
}

/// Pre-shared secret a PAKE session is anchored to.
///
/// While binding this is the PIN. Otherwise it is a MAC over the salt, computed inside the key
/// store with the pre-shared key persisted during binding.
pub(crate) fn pake_psk<P: Platform>(
    ctx: &ProtocolContext<'_, P>,
    peer_auth_id: &[u8],
    salt: &[u8],
) -> Result<SecretBytes, AuthError> {
    match ctx.params.op_code {
        OpCode::Bind => ctx
            .params
            .pin
            .clone()
            .ok_or(AuthError::InvalidInput("binding requires a pin")),
        OpCode::Authenticate | OpCode::Unbind => {
            let alias = ctx
                .params
                .peer_token_params(peer_auth_id)
                .alias(KeyPurpose::Psk);
            let mac = ctx
                .provider
                .hmac_with_alias(&alias, &[salt])
                .map_err(AuthError::crypto)?;
            Ok(SecretBytes::from_slice(&mac))
        }
    }
}

/// Secret the group generator is derived from.
pub(crate) fn pake_base_secret<P: Platform>(
    provider: &P,
    salt: &[u8],
    psk: &SecretBytes,
) -> Result<Secret<BASE_SECRET_SIZE>, AuthError> {
    let secret = provider
        .hkdf(salt, psk.as_bytes(), Some(PAKE_BASE_INFO))
        .map_err(AuthError::crypto)?;
    Ok(Secret::from_bytes(secret))
}

/// Derived keys of a finished key agreement.
#[derive(Debug)]
pub(crate) struct SessionKeys {
    pub confirmation_key: Secret<32>,
    pub session_key: Secret<32>,
    pub exchange_key: Secret<AEAD_KEY_SIZE>,
}

impl SessionKeys {
    pub fn derive<P: Platform>(
        provider: &P,
        salt: &[u8],
        shared_secret: &SecretBytes,
        info: &[u8],
    ) -> Result<Self, AuthError> {
        let okm: [u8; 96] = provider
            .hkdf(salt, shared_secret.as_bytes(), Some(info))
            .map_err(AuthError::crypto)?;
        let okm = Secret::from_bytes(okm);
        let split = |range: std::ops::Range<usize>| {
            let mut key = [0u8; 32];
            key.copy_from_slice(&okm.as_bytes()[range]);
            Secret::from_bytes(key)
        };
        Ok(Self {
            confirmation_key: split(0..32),
            session_key: split(32..64),
            exchange_key: split(64..96),
        })
    }
}

/// Checks a key confirmation MAC in constant time.
pub(crate) fn verify_confirmation(expected: &[u8], received: &[u8]) -> Result<(), AuthError> {
    if bool::from(expected.ct_eq(received)) {
        Ok(())
    } else {
        Err(AuthError::ConfirmationMismatch)
    }
}

/// Long-term identity sealed into the key confirmation while binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedExchange {
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ExchangePayload {
    #[serde(with = "serde_bytes")]
    auth_id: Vec<u8>,
    #[serde(with = "serde_bytes")]
    public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    signature: Vec<u8>,
}

/// Seals the own long-term public key, signed together with the own identity.
///
/// The local identity is registered first if it does not exist yet.
pub(crate) fn seal_exchange<P: Platform>(
    ctx: &ProtocolContext<'_, P>,
    exchange_key: &Secret<AEAD_KEY_SIZE>,
) -> Result<SealedExchange, AuthError> {
    let own = ctx.params.own_token_params();
    ctx.token_manager
        .register_local_identity(ctx.provider, &own)?;
    let public_key = ctx.token_manager.get_public_key(ctx.provider, &own)?;

    let signature = ctx
        .provider
        .sign(
            &own.alias(KeyPurpose::KeyPair),
            &[own.auth_id.as_slice(), public_key.as_slice()].concat(),
        )
        .map_err(AuthError::crypto)?;

    let payload = encode_cbor(&ExchangePayload {
        auth_id: own.auth_id,
        public_key,
        signature,
    })?;
    let nonce: AeadNonce = RandProvider::random_array(ctx.provider).map_err(AuthError::crypto)?;
    let ciphertext = ctx
        .provider
        .aead_encrypt(exchange_key.as_bytes(), &payload, nonce, Some(EXCHANGE_AAD))
        .map_err(AuthError::crypto)?;

    Ok(SealedExchange {
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Opens the peer's sealed identity, checks its signature and persists the pre-shared key.
pub(crate) fn open_exchange<P: Platform>(
    ctx: &ProtocolContext<'_, P>,
    exchange_key: &Secret<AEAD_KEY_SIZE>,
    sealed: &SealedExchange,
    peer_auth_id: &[u8],
) -> Result<(), AuthError> {
    let nonce: AeadNonce = sealed
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::InvalidInput("exchange nonce has invalid size"))?;

    let plaintext = ctx
        .provider
        .aead_decrypt(
            exchange_key.as_bytes(),
            &sealed.ciphertext,
            nonce,
            Some(EXCHANGE_AAD),
        )
        .map_err(AuthError::crypto)?;
    let payload: ExchangePayload = decode_cbor(plaintext.as_slice())?;

    if payload.auth_id != peer_auth_id {
        return Err(AuthError::UnexpectedPeer);
    }

    ctx.provider
        .verify(
            &payload.public_key,
            &[payload.auth_id.as_slice(), payload.public_key.as_slice()].concat(),
            &payload.signature,
        )
        .map_err(AuthError::crypto)?;

    ctx.token_manager.compute_and_persist_psk(
        ctx.provider,
        &ctx.params.own_token_params(),
        peer_auth_id,
        &payload.public_key,
    )?;
    debug!(peer = hex::encode(peer_auth_id), "bound peer identity");
    Ok(())
}

/// Removes all credentials shared with the peer after a successful unbind.
pub(crate) fn finish_unbind<P: Platform>(
    ctx: &ProtocolContext<'_, P>,
    peer_auth_id: &[u8],
) -> Result<(), AuthError> {
    ctx.token_manager
        .delete_peer_auth_info(ctx.provider, &ctx.params.peer_token_params(peer_auth_id))?;
    debug!(peer = hex::encode(peer_auth_id), "unbound peer identity");
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::crypto::Provider;
    use crate::crypto::modp::{MODP_2048_PRIME, MODP_3072_PRIME, prime_bytes};
    use crate::error::AuthError;
    use crate::version::AlgorithmMask;

    use super::{
        PakeCurve, PakeSessionParams, agree_shared_secret, decrement, generate_pake_params,
    };

    fn session(provider: &Provider, curve: PakeCurve, secret: &[u8]) -> PakeSessionParams {
        let mut params = PakeSessionParams::new(curve, 0);
        generate_pake_params(provider, &mut params, secret).unwrap();
        params
    }

    #[rstest]
    #[case(PakeCurve::Ristretto255)]
    #[case(PakeCurve::Modp2048)]
    #[case(PakeCurve::Modp3072)]
    fn same_secret_agrees(#[case] curve: PakeCurve) {
        let provider = Provider::from_seed([1; 32]);

        let mut alice = session(&provider, curve, b"123456");
        let mut bob = session(&provider, curve, b"123456");
        assert_eq!(alice.public_key.len(), curve.key_size());

        let alice_public = alice.public_key.clone();
        agree_shared_secret(&provider, &mut alice, &bob.public_key.clone()).unwrap();
        agree_shared_secret(&provider, &mut bob, &alice_public).unwrap();
        assert_eq!(alice.shared_secret(), bob.shared_secret());
    }

    #[rstest]
    #[case(PakeCurve::Ristretto255)]
    #[case(PakeCurve::Modp2048)]
    fn different_secret_disagrees(#[case] curve: PakeCurve) {
        let provider = Provider::from_seed([2; 32]);

        let mut alice = session(&provider, curve, b"123456");
        let mut bob = session(&provider, curve, b"654321");

        let alice_public = alice.public_key.clone();
        agree_shared_secret(&provider, &mut alice, &bob.public_key.clone()).unwrap();
        agree_shared_secret(&provider, &mut bob, &alice_public).unwrap();
        assert_ne!(alice.shared_secret(), bob.shared_secret());
    }

    #[rstest]
    #[case(PakeCurve::Modp2048, MODP_2048_PRIME)]
    #[case(PakeCurve::Modp3072, MODP_3072_PRIME)]
    fn invalid_discrete_log_keys(#[case] curve: PakeCurve, #[case] prime: &str) {
        let provider = Provider::from_seed([3; 32]);
        let size = curve.key_size();

        let zero = vec![0u8; size];
        let mut one = vec![0u8; size];
        one[size - 1] = 1;
        let mut prime_minus_one = prime_bytes(prime).unwrap();
        decrement(&mut prime_minus_one);
        let prime = prime_bytes(prime).unwrap();

        for key in [zero, one, prime_minus_one, prime, vec![2u8; size - 1]] {
            let mut params = session(&provider, curve, b"123456");
            assert!(matches!(
                agree_shared_secret(&provider, &mut params, &key),
                Err(AuthError::InvalidPublicKey)
            ));
            assert!(params.shared_secret().is_none());
        }
    }

    #[test]
    fn invalid_points() {
        let provider = Provider::from_seed([4; 32]);

        for key in [vec![0u8; 32], vec![0xffu8; 32], vec![1u8; 31], vec![1u8; 33]] {
            let mut params = session(&provider, PakeCurve::Ristretto255, b"123456");
            assert!(matches!(
                agree_shared_secret(&provider, &mut params, &key),
                Err(AuthError::InvalidPublicKey)
            ));
            assert!(params.shared_secret().is_none());
        }
    }

    #[test]
    fn curve_preference() {
        assert_eq!(
            PakeCurve::for_pake_v1(AlgorithmMask::ALL),
            Some(PakeCurve::Ristretto255)
        );
        assert_eq!(
            PakeCurve::for_pake_v1(AlgorithmMask::DL_PAKE_V1_2048 | AlgorithmMask::DL_PAKE_V1_3072),
            Some(PakeCurve::Modp3072)
        );
        assert_eq!(
            PakeCurve::for_pake_v1(AlgorithmMask::DL_PAKE_V1_2048),
            Some(PakeCurve::Modp2048)
        );
        assert_eq!(PakeCurve::for_pake_v1(AlgorithmMask::EC_PAKE_V2), None);
    }

    #[test]
    fn decrement_borrows() {
        let mut number = vec![0x01, 0x00, 0x00];
        decrement(&mut number);
        assert_eq!(number, vec![0x00, 0xff, 0xff]);
    }
}
