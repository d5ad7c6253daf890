// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol versions and their negotiation between two peers.
//!
//! A version is a (major, minor) pair plus an [`AlgorithmMask`] in the patch position, listing the
//! key-agreement algorithms a side is willing to run. Both peers exchange their minimum and
//! current version; the negotiated version is the highest one both support and runs only
//! algorithms both sides support.
use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Bitmask of supported key-agreement algorithms.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlgorithmMask(u64);

impl AlgorithmMask {
    pub const EMPTY: Self = Self(0);

    /// ISO challenge-response with symmetric credentials.
    pub const ISO: Self = Self(0x01);

    /// PAKE v1 over the 3072-bit MODP group.
    pub const DL_PAKE_V1_3072: Self = Self(0x02);

    /// PAKE v1 over Ristretto255.
    pub const EC_PAKE_V1: Self = Self(0x04);

    /// PAKE v2 over Ristretto255.
    pub const EC_PAKE_V2: Self = Self(0x08);

    /// PAKE v1 over the 2048-bit MODP group.
    pub const DL_PAKE_V1_2048: Self = Self(0x10);

    pub const ALL: Self = Self(0x1f);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if at least one bit is set in both masks.
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitAnd for AlgorithmMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for AlgorithmMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for AlgorithmMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlgorithmMask({:#04x})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: AlgorithmMask,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: AlgorithmMask) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn number(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{:#x}", self.major, self.minor, self.patch.bits())
    }
}

/// Negotiates the version both sides run.
///
/// Major and minor are the smaller of both current versions and must not fall below either
/// side's minimum version. The algorithm mask is the intersection of both masks and must not be
/// empty. Swapping the roles of both sides gives the same result.
pub fn negotiate_version(
    self_min: &Version,
    self_cur: &Version,
    peer_min: &Version,
    peer_cur: &Version,
) -> Result<Version, AuthError> {
    let ceiling = self_cur.number().min(peer_cur.number());
    let floor = self_min.number().max(peer_min.number());
    if ceiling < floor {
        return Err(AuthError::UnsupportedVersion);
    }

    let patch = self_cur.patch & peer_cur.patch;
    if patch.is_empty() {
        return Err(AuthError::UnsupportedVersion);
    }

    Ok(Version::new(ceiling.0, ceiling.1, patch))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::error::AuthError;

    use super::{AlgorithmMask, Version, negotiate_version};

    const ALL: AlgorithmMask = AlgorithmMask::ALL;
    const ISO: AlgorithmMask = AlgorithmMask::ISO;
    const EC_V2: AlgorithmMask = AlgorithmMask::EC_PAKE_V2;

    fn v(major: u32, minor: u32, patch: AlgorithmMask) -> Version {
        Version::new(major, minor, patch)
    }

    #[rstest]
    #[case(v(1, 0, ALL), v(2, 0, ALL), v(1, 0, ALL), v(2, 0, ALL), v(2, 0, ALL))]
    #[case(v(1, 0, ALL), v(2, 0, ALL), v(1, 0, ALL), v(1, 5, ISO), v(1, 5, ISO))]
    #[case(v(1, 2, ALL), v(3, 0, EC_V2), v(1, 0, ALL), v(2, 1, ALL), v(2, 1, EC_V2))]
    #[case(v(2, 0, ALL), v(2, 0, ISO | EC_V2), v(2, 0, ALL), v(4, 0, EC_V2), v(2, 0, EC_V2))]
    fn negotiation_converges(
        #[case] self_min: Version,
        #[case] self_cur: Version,
        #[case] peer_min: Version,
        #[case] peer_cur: Version,
        #[case] expected: Version,
    ) {
        let result = negotiate_version(&self_min, &self_cur, &peer_min, &peer_cur).unwrap();
        assert_eq!(result, expected);

        // Roles can be swapped.
        let swapped = negotiate_version(&peer_min, &peer_cur, &self_min, &self_cur).unwrap();
        assert_eq!(swapped, expected);

        // Result lies within both ranges.
        for (min, cur) in [(self_min, self_cur), (peer_min, peer_cur)] {
            assert!((result.major, result.minor) >= (min.major, min.minor));
            assert!((result.major, result.minor) <= (cur.major, cur.minor));
        }
    }

    #[rstest]
    // No overlap in version ranges.
    #[case(v(3, 0, ALL), v(4, 0, ALL), v(1, 0, ALL), v(2, 9, ALL))]
    // No common algorithm.
    #[case(v(1, 0, ALL), v(2, 0, ISO), v(1, 0, ALL), v(2, 0, EC_V2))]
    // Empty mask on one side.
    #[case(v(1, 0, ALL), v(2, 0, AlgorithmMask::EMPTY), v(1, 0, ALL), v(2, 0, ALL))]
    // Malformed range where minimum lies above current.
    #[case(v(3, 0, ALL), v(2, 0, ALL), v(1, 0, ALL), v(2, 0, ALL))]
    fn negotiation_fails(
        #[case] self_min: Version,
        #[case] self_cur: Version,
        #[case] peer_min: Version,
        #[case] peer_cur: Version,
    ) {
        assert!(matches!(
            negotiate_version(&self_min, &self_cur, &peer_min, &peer_cur),
            Err(AuthError::UnsupportedVersion)
        ));
        assert!(matches!(
            negotiate_version(&peer_min, &peer_cur, &self_min, &self_cur),
            Err(AuthError::UnsupportedVersion)
        ));
    }

    #[test]
    fn mask_accessors() {
        let mask = AlgorithmMask::ISO | AlgorithmMask::EC_PAKE_V2;
        assert!(mask.contains(AlgorithmMask::ISO));
        assert!(!mask.contains(AlgorithmMask::ISO | AlgorithmMask::EC_PAKE_V1));
        assert!(mask.intersects(AlgorithmMask::ISO | AlgorithmMask::EC_PAKE_V1));
        assert!(!mask.intersects(AlgorithmMask::DL_PAKE_V1_2048));
        assert_eq!((mask & AlgorithmMask::ISO).bits(), 0x01);
        assert!(AlgorithmMask::ALL.contains(mask));
    }
}
