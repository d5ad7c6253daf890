// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prime-order group operations on Ristretto255 used by the elliptic-curve PAKE variants.
//!
//! Points travel as 32-byte compressed encodings. Every decoded point is checked for being a
//! canonical encoding and not the identity before it is used in any multiplication.
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use thiserror::Error;

use crate::crypto::sha2::sha2_512;

/// Size of a compressed Ristretto255 point.
pub const POINT_SIZE: usize = 32;

/// Size of a scalar.
pub const SCALAR_SIZE: usize = 32;

/// Domain separation tag for hashing secrets onto the curve.
const HASH_TO_POINT_DST: &[u8] = b"p2panda-device-auth-ristretto255-h2p";

/// Maps arbitrary bytes to a group element whose discrete logarithm is unknown.
pub fn hash_to_point(input: &[u8]) -> Result<[u8; POINT_SIZE], RistrettoError> {
    let hash = sha2_512(&[HASH_TO_POINT_DST, input]);
    let point = RistrettoPoint::from_uniform_bytes(&hash);
    if point == RistrettoPoint::identity() {
        return Err(RistrettoError::IdentityPoint);
    }
    Ok(point.compress().to_bytes())
}

/// Returns true if the bytes are a canonical encoding of a non-identity point.
pub fn is_valid_point(point: &[u8]) -> bool {
    decode_point(point).is_ok()
}

/// Multiplies the point with the scalar. The scalar is reduced modulo the group order.
pub fn point_mul(scalar: &[u8; SCALAR_SIZE], point: &[u8]) -> Result<[u8; POINT_SIZE], RistrettoError> {
    let point = decode_point(point)?;
    let scalar = Scalar::from_bytes_mod_order(*scalar);
    if scalar == Scalar::ZERO {
        return Err(RistrettoError::ZeroScalar);
    }

    let result = scalar * point;
    if result == RistrettoPoint::identity() {
        return Err(RistrettoError::IdentityPoint);
    }
    Ok(result.compress().to_bytes())
}

fn decode_point(bytes: &[u8]) -> Result<RistrettoPoint, RistrettoError> {
    let compressed =
        CompressedRistretto::from_slice(bytes).map_err(|_| RistrettoError::InvalidLength)?;
    let point = compressed
        .decompress()
        .ok_or(RistrettoError::InvalidEncoding)?;
    if point == RistrettoPoint::identity() {
        return Err(RistrettoError::IdentityPoint);
    }
    Ok(point)
}

#[derive(Debug, Error)]
pub enum RistrettoError {
    #[error("point has invalid length")]
    InvalidLength,

    #[error("bytes are not a canonical ristretto255 encoding")]
    InvalidEncoding,

    #[error("point is the identity element")]
    IdentityPoint,

    #[error("scalar is zero")]
    ZeroScalar,
}

#[cfg(test)]
mod tests {
    use super::{RistrettoError, hash_to_point, is_valid_point, point_mul};

    #[test]
    fn diffie_hellman_on_hashed_base() {
        let base = hash_to_point(b"123456").unwrap();

        let alice_secret = [3u8; 32];
        let bob_secret = [5u8; 32];

        let alice_public = point_mul(&alice_secret, &base).unwrap();
        let bob_public = point_mul(&bob_secret, &base).unwrap();

        assert_eq!(
            point_mul(&alice_secret, &bob_public).unwrap(),
            point_mul(&bob_secret, &alice_public).unwrap()
        );
    }

    #[test]
    fn different_secrets_give_different_bases() {
        assert_ne!(hash_to_point(b"123456").unwrap(), hash_to_point(b"654321").unwrap());
        assert_eq!(hash_to_point(b"123456").unwrap(), hash_to_point(b"123456").unwrap());
    }

    #[test]
    fn rejects_invalid_points() {
        // Identity encodes as all zeros.
        assert!(!is_valid_point(&[0u8; 32]));
        assert!(!is_valid_point(&[1u8; 31]));
        // Non-canonical encoding (field element larger than p).
        assert!(!is_valid_point(&[0xffu8; 32]));

        assert!(matches!(
            point_mul(&[1u8; 32], &[0u8; 32]),
            Err(RistrettoError::IdentityPoint)
        ));
        assert!(matches!(
            point_mul(&[0u8; 32], &hash_to_point(b"pin").unwrap()),
            Err(RistrettoError::ZeroScalar)
        ));
    }
}
