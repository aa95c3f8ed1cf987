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

//! Real mainnet blocks used as hashing test vectors across the workspace.

use crate::{BlockHeader, DHash, BLOCK_HEADER_SIZE};

use lazy_static::lazy_static;

/// One historic block with its solved header and expected hash
#[derive(Clone, Copy, Debug)]
pub struct TestBlock {
    pub version: u32,
    pub previous_hash: DHash,
    pub merkle_root: DHash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Expected double SHA256 of the header
    pub hash: DHash,
    /// Expected hash in conventional hex form
    pub hash_str: &'static str,
    /// Packed 80 byte header
    pub header_bytes: [u8; BLOCK_HEADER_SIZE],
}

impl TestBlock {
    fn new(header_hex: &str, hash_str: &'static str) -> Self {
        let mut header_bytes = [0u8; BLOCK_HEADER_SIZE];
        hex::decode_to_slice(header_hex, &mut header_bytes).expect("invalid test header hex");
        let header = BlockHeader::from_bytes(&header_bytes);
        let hash = header.hash();
        assert_eq!(hash_str, format!("{}", hash), "test block hash mismatch");

        Self {
            version: header.version,
            previous_hash: DHash::from_inner(header.previous_hash),
            merkle_root: DHash::from_inner(header.merkle_root),
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
            hash,
            hash_str,
            header_bytes,
        }
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader::from_bytes(&self.header_bytes)
    }
}

lazy_static! {
    pub static ref TEST_BLOCKS: Vec<TestBlock> = vec![
        // mainnet genesis block
        TestBlock::new(
            "01000000000000000000000000000000000000000000000000000000000000000000\
             00003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a\
             29ab5f49ffff001d1dac2b7c",
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        ),
        // mainnet block 125552
        TestBlock::new(
            "0100000081cd02ab7e569e8bcd9317e2fe99f2de44d49ab2b8851ba4a30800000000\
             0000e320b6c2fffc8d750423db8b1eb942ae710e951ed797f7affc8892b0f1fc122b\
             c7f5d74df2b9441a42a14695",
            "00000000000000001e8d6829a8a21adc5d38d0a473b144b6765798e61f98bd1d",
        ),
    ];
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_blocks_consistency() {
        assert_eq!(TEST_BLOCKS.len(), 2);
        for block in TEST_BLOCKS.iter() {
            assert_eq!(block.header().hash(), block.hash);
        }

        // genesis specifics
        let genesis = &TEST_BLOCKS[0];
        assert_eq!(genesis.version, 1);
        assert_eq!(genesis.time, 1231006505);
        assert_eq!(genesis.bits, 0x1d00ffff);
        assert_eq!(genesis.nonce, 2083236893);
    }
}
