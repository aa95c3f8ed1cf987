// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! 256-bit mining target with conversions from/to the Bitcoin compact form
//! (nBits) and from pool difficulty.

use crate::{DHash, DIFFICULTY_1_TARGET_BYTES, SHA256_DIGEST_SIZE};

use lazy_static::lazy_static;
use thiserror::Error;
use uint::construct_uint;

use std::fmt;

construct_uint! {
    /// 256-bit unsigned integer used for target arithmetic
    pub struct U256(4);
}

/// Fixed point shift used when converting pool difficulty to a target.
/// 24 fractional bits cover all difficulties pools hand out in practice.
const POOL_DIFFICULTY_FRACTION_BITS: usize = 24;

lazy_static! {
    /// Numeric value of difficulty 1 target
    static ref DIFFICULTY_1_TARGET: U256 = U256::from_big_endian(&DIFFICULTY_1_TARGET_BYTES);
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TargetError {
    #[error("compact target is negative")]
    Negative,
    #[error("compact target overflows 256 bits")]
    Overflow,
    #[error("invalid target difficulty: {0}")]
    Difficulty(f64),
}

/// Upper bound on a valid proof-of-work hash, compared numerically
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target(U256);

impl Target {
    /// Target corresponding to pool difficulty 1
    pub fn difficulty_1() -> Self {
        Self(*DIFFICULTY_1_TARGET)
    }

    /// Expand the Bitcoin compact form (nBits): the high byte is a base 256
    /// exponent, the low 24 bits a mantissa. The sign bit of the mantissa is
    /// rejected, overflow beyond 256 bits as well.
    pub fn from_compact(bits: u32) -> Result<Self, TargetError> {
        let exponent = (bits >> 24) as usize;
        let mantissa = bits & 0x007f_ffff;

        if bits & 0x0080_0000 != 0 && mantissa != 0 {
            return Err(TargetError::Negative);
        }
        if mantissa == 0 {
            return Ok(Self(U256::zero()));
        }
        if exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32)
        {
            return Err(TargetError::Overflow);
        }

        let value = if exponent <= 3 {
            U256::from(mantissa >> (8 * (3 - exponent)))
        } else {
            U256::from(mantissa) << (8 * (exponent - 3))
        };
        Ok(Self(value))
    }

    /// Compress back to the canonical compact form
    pub fn to_compact(&self) -> u32 {
        let mut size = (self.0.bits() + 7) / 8;
        let mut mantissa = if size <= 3 {
            self.0.low_u32() << (8 * (3 - size))
        } else {
            (self.0 >> (8 * (size - 3))).low_u32()
        };
        // the mantissa sign bit must stay clear; borrow one exponent step
        if mantissa & 0x0080_0000 != 0 {
            mantissa >>= 8;
            size += 1;
        }
        (size as u32) << 24 | mantissa
    }

    /// Compute target for a given pool difficulty: difficulty 1 target
    /// divided by `difficulty`. Fractional difficulties are supported with
    /// 24 bits of precision.
    pub fn from_pool_difficulty(difficulty: f64) -> Result<Self, TargetError> {
        if !difficulty.is_finite() || difficulty <= 0.0 {
            return Err(TargetError::Difficulty(difficulty));
        }
        let divisor = (difficulty * (1u64 << POOL_DIFFICULTY_FRACTION_BITS) as f64) as u128;
        if divisor == 0 {
            return Err(TargetError::Difficulty(difficulty));
        }
        Ok(Self(
            (*DIFFICULTY_1_TARGET << POOL_DIFFICULTY_FRACTION_BITS) / U256::from(divisor),
        ))
    }

    /// Get binary representation as a big endian (numeric) byte array
    pub fn into_bytes(self) -> [u8; SHA256_DIGEST_SIZE] {
        let mut bytes = [0u8; SHA256_DIGEST_SIZE];
        self.0.to_big_endian(&mut bytes);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; SHA256_DIGEST_SIZE]) -> Self {
        Self(U256::from_big_endian(bytes))
    }

    /// Check whether `hash` satisfies this target (hash <= target when both
    /// are interpreted as 256-bit unsigned integers)
    pub fn is_met_by(&self, hash: &DHash) -> bool {
        U256::from_little_endian(hash.as_ref()) <= self.0
    }

    /// Approximate pool difficulty corresponding to this target
    pub fn get_difficulty(&self) -> f64 {
        u256_to_f64(*DIFFICULTY_1_TARGET) / u256_to_f64(self.0)
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::difficulty_1()
    }
}

fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .enumerate()
        .map(|(i, limb)| (*limb as f64) * 2f64.powi(64 * i as i32))
        .sum()
}

macro_rules! target_fmt_impl (
    ($imp:ident) => (
        impl fmt::$imp for Target {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                for byte in self.into_bytes().iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    )
);

target_fmt_impl!(Debug);
target_fmt_impl!(Display);
target_fmt_impl!(LowerHex);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_difficulty_1_compact() {
        let target = Target::from_compact(0x1d00ffff).expect("difficulty 1 compact");
        assert_eq!(target, Target::difficulty_1());

        let bytes = target.into_bytes();
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[4..8], &[0xff, 0xff, 0x00, 0x00]);
        assert_eq!(&bytes[8..], &[0u8; 24][..]);
    }

    #[test]
    fn test_compact_round_trip() {
        // canonical encodings recompact to themselves
        for bits in &[
            0x1d00ffffu32,
            0x1b0404cb,
            0x1a44b9f2,
            0x17053894,
            0x04123456,
            0x03123456,
            0x02123400,
            0x01120000,
        ] {
            let target = Target::from_compact(*bits).expect("valid compact");
            assert_eq!(target.to_compact(), *bits, "bits {:#010x}", bits);
        }
    }

    #[test]
    fn test_compact_low_exponent() {
        // exponent <= 3 shifts the mantissa right
        assert_eq!(
            Target::from_compact(0x03123456).expect("exp 3"),
            Target(U256::from(0x123456u32))
        );
        assert_eq!(
            Target::from_compact(0x02123456).expect("exp 2"),
            Target(U256::from(0x1234u32))
        );
        assert_eq!(
            Target::from_compact(0x01123456).expect("exp 1"),
            Target(U256::from(0x12u32))
        );
        assert_eq!(
            Target::from_compact(0x00123456).expect("exp 0"),
            Target(U256::zero())
        );
    }

    #[test]
    fn test_compact_negative_and_overflow() {
        assert_eq!(Target::from_compact(0x01803456), Err(TargetError::Negative));
        assert_eq!(Target::from_compact(0x23000001), Err(TargetError::Overflow));
        assert_eq!(Target::from_compact(0x22000100), Err(TargetError::Overflow));
        assert_eq!(Target::from_compact(0x21010000), Err(TargetError::Overflow));
        // zero mantissa never overflows
        assert_eq!(
            Target::from_compact(0xff000000).expect("zero mantissa"),
            Target(U256::zero())
        );
    }

    #[test]
    fn test_pool_difficulty() {
        let diff_1 = Target::from_pool_difficulty(1.0).expect("difficulty 1");
        assert_eq!(diff_1, Target::difficulty_1());

        // halving the difficulty doubles the target
        let diff_half = Target::from_pool_difficulty(0.5).expect("difficulty 0.5");
        assert_eq!(diff_half.0, Target::difficulty_1().0 * U256::from(2u32));

        let diff_8192 = Target::from_pool_difficulty(8192.0).expect("difficulty 8192");
        assert_eq!(diff_8192.0, Target::difficulty_1().0 / U256::from(8192u32));

        assert!(Target::from_pool_difficulty(0.0).is_err());
        assert!(Target::from_pool_difficulty(-2.0).is_err());
        assert!(Target::from_pool_difficulty(f64::NAN).is_err());
    }

    #[test]
    fn test_difficulty_estimate() {
        for difficulty in &[1.0f64, 2.0, 64.0, 8192.0] {
            let target = Target::from_pool_difficulty(*difficulty).expect("valid difficulty");
            let estimate = target.get_difficulty();
            assert!(
                (estimate - difficulty).abs() / difficulty < 1e-6,
                "difficulty {} estimated as {}",
                difficulty,
                estimate
            );
        }
    }

    #[test]
    fn test_target_met_by_block_hashes() {
        // every real block hash satisfies its own network target
        for block in crate::TEST_BLOCKS.iter() {
            let target = Target::from_compact(block.bits).expect("block compact");
            assert!(target.is_met_by(&block.hash));
        }

        // an arbitrary double hash is far above difficulty 1
        let junk = DHash::hash(b"junk");
        assert!(!Target::difficulty_1().is_met_by(&junk));
    }
}
