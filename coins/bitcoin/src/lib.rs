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

//! Bitcoin primitives shared by the miner: SHA256/double SHA256 hashing, the
//! 80 byte block header and the 256-bit difficulty target.

mod target;
pub mod test_blocks;

pub use target::{Target, TargetError};
pub use test_blocks::{TestBlock, TEST_BLOCKS};

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};

use std::fmt;
use std::str::FromStr;

/// SHA256 digest size used in Bitcoin protocol
pub const SHA256_DIGEST_SIZE: usize = 32;

/// A Bitcoin block header is 80 bytes long
pub const BLOCK_HEADER_SIZE: usize = 80;

/// Offset of the nonce field within the packed block header
pub const BLOCK_HEADER_NONCE_OFFSET: usize = 76;

/// Binary representation of target for difficulty 1
pub const DIFFICULTY_1_TARGET_BYTES: [u8; SHA256_DIGEST_SIZE] = [
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Array containing SHA256 digest
pub type Sha256Array = [u8; SHA256_DIGEST_SIZE];

/// Compute single SHA256 over arbitrary input
pub fn sha256(input: &[u8]) -> Sha256Array {
    let mut output = [0u8; SHA256_DIGEST_SIZE];
    output.copy_from_slice(Sha256::digest(input).as_slice());
    output
}

/// Double SHA256 hash as used for Bitcoin proof of work and merkle trees.
///
/// The inner bytes are kept in the order the hash function produces them
/// (the conventional hex form shown by block explorers is byte-reversed,
/// which is what all the `fmt` implementations and `FromStr` use).
#[derive(Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct DHash(Sha256Array);

impl DHash {
    /// Compute SHA256 double hash of `input`
    pub fn hash(input: &[u8]) -> Self {
        Self(sha256(&sha256(input)))
    }

    /// Get binary representation in internal (hashing) byte order
    #[inline]
    pub fn into_inner(self) -> Sha256Array {
        self.0
    }

    #[inline]
    pub fn from_inner(bytes: Sha256Array) -> Self {
        Self(bytes)
    }
}

impl AsRef<Sha256Array> for DHash {
    fn as_ref(&self) -> &Sha256Array {
        &self.0
    }
}

impl FromStr for DHash {
    type Err = hex::FromHexError;

    /// Parse hash from conventional (byte-reversed) hex representation
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; SHA256_DIGEST_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

macro_rules! dhash_fmt_impl (
    ($imp:ident) => (
        impl fmt::$imp for DHash {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                for byte in self.0.iter().rev() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    )
);

dhash_fmt_impl!(Debug);
dhash_fmt_impl!(Display);
dhash_fmt_impl!(LowerHex);

/// Bitcoin block header structure which can be packed to its 80 byte binary
/// representation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockHeader {
    /// Version field that reflects the current network consensus
    pub version: u32,
    /// Double SHA256 hash of the previous block header
    pub previous_hash: Sha256Array,
    /// Double SHA256 hash based on all of the transactions in the block
    pub merkle_root: Sha256Array,
    /// Current block timestamp as seconds since 1970-01-01T00:00 UTC
    pub time: u32,
    /// Current target in compact format (network difficulty)
    pub bits: u32,
    /// The nonce that is iterated by the mining hardware
    pub nonce: u32,
}

impl BlockHeader {
    /// Get binary representation of Bitcoin block header
    pub fn into_bytes(self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.version);
        bytes[4..36].copy_from_slice(&self.previous_hash);
        bytes[36..68].copy_from_slice(&self.merkle_root);
        LittleEndian::write_u32(&mut bytes[68..72], self.time);
        LittleEndian::write_u32(&mut bytes[72..76], self.bits);
        LittleEndian::write_u32(&mut bytes[76..80], self.nonce);
        bytes
    }

    /// Parse a block header from its 80 byte binary representation
    pub fn from_bytes(bytes: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        let mut previous_hash = [0u8; SHA256_DIGEST_SIZE];
        let mut merkle_root = [0u8; SHA256_DIGEST_SIZE];
        previous_hash.copy_from_slice(&bytes[4..36]);
        merkle_root.copy_from_slice(&bytes[36..68]);
        Self {
            version: LittleEndian::read_u32(&bytes[0..4]),
            previous_hash,
            merkle_root,
            time: LittleEndian::read_u32(&bytes[68..72]),
            bits: LittleEndian::read_u32(&bytes[72..76]),
            nonce: LittleEndian::read_u32(&bytes[76..80]),
        }
    }

    /// Compute SHA256 double hash of the packed header
    pub fn hash(&self) -> DHash {
        DHash::hash(&self.into_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// NIST SHA256 test vectors (FIPS 180-2)
    #[test]
    fn test_sha256_vectors() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(sha256(b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq")),
            "248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1"
        );
    }

    #[test]
    fn test_double_sha256() {
        // canonical "abc" double hash
        assert_eq!(
            hex::encode(DHash::hash(b"abc").into_inner()),
            "4f8b42c22dd3729b519ba6f68d2da7cc5b2d606d05daed5ad5128cc03e6c6358"
        );
    }

    #[test]
    fn test_dhash_hex_round_trip() {
        let hash = DHash::hash(b"abc");
        let displayed = format!("{}", hash);
        // display uses reversed byte order
        assert_eq!(
            displayed,
            "58636c3ec08c12d55aedda056d602d5bcca72d8df6a69b519b72d32dc2428b4f"
        );
        assert_eq!(displayed.parse::<DHash>().expect("parse hash"), hash);
    }

    #[test]
    fn test_block_header_packing() {
        for block in TEST_BLOCKS.iter() {
            let header = block.header();
            assert_eq!(&header.into_bytes()[..], &block.header_bytes[..]);
            assert_eq!(BlockHeader::from_bytes(&block.header_bytes), header);
        }
    }

    #[test]
    fn test_block_header_hash() {
        for block in TEST_BLOCKS.iter() {
            let header = block.header();
            assert_eq!(header.hash(), block.hash);
            assert_eq!(block.hash_str, format!("{}", header.hash()));
            assert_eq!(block.hash_str, format!("{:x}", header.hash()));
        }
    }
}
