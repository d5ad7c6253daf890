// SPDX-License-Identifier: MIT OR Apache-2.0

//! Big-number arithmetic over the RFC 3526 MODP groups used by the discrete-log PAKE variants.
//!
//! All numbers are unsigned big-endian byte strings. Results of modular exponentiation are
//! left-padded to the byte length of the modulus so they can be compared and transmitted with a
//! fixed size.
//!
//! <https://www.rfc-editor.org/rfc/rfc3526>
use std::cmp::Ordering;

use num_bigint::BigUint;
use thiserror::Error;

/// 2048-bit MODP group (group 14).
pub const MODP_2048_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// 3072-bit MODP group (group 15).
pub const MODP_3072_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

/// Modular exponentiation `base ^ exponent mod modulus`, left-padded to the modulus size.
pub fn exp_mod(base: &[u8], exponent: &[u8], modulus: &[u8]) -> Result<Vec<u8>, ModpError> {
    let modulus_num = BigUint::from_bytes_be(modulus);
    if modulus_num <= BigUint::from(1u8) {
        return Err(ModpError::InvalidModulus);
    }

    let result = BigUint::from_bytes_be(base).modpow(&BigUint::from_bytes_be(exponent), &modulus_num);
    Ok(pad_to(result.to_bytes_be(), modulus.len()))
}

/// Compares two unsigned big-endian numbers of arbitrary (and possibly different) byte length.
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    BigUint::from_bytes_be(a).cmp(&BigUint::from_bytes_be(b))
}

/// Decodes one of the hex prime constants into big-endian bytes.
pub fn prime_bytes(prime_hex: &str) -> Result<Vec<u8>, ModpError> {
    hex::decode(prime_hex).map_err(|_| ModpError::InvalidModulus)
}

fn pad_to(bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes;
    }
    let mut padded = vec![0u8; len - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}

#[derive(Debug, Error)]
pub enum ModpError {
    #[error("modulus is invalid")]
    InvalidModulus,
}
