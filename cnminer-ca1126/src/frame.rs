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

//! Fixed width frame codec of the board link. Every frame is 40 bytes:
//! "CN" magic, command byte, option byte, packet index/count and a 32 byte
//! payload protected by CRC-16-CCITT.

use byteorder::{BigEndian, ByteOrder};
use failure::Fail;

/// Total size of one frame on the wire
pub const FRAME_SIZE: usize = 40;

/// Payload capacity of one frame
pub const PAYLOAD_SIZE: usize = 32;

/// Every frame starts with these two bytes
pub const HEADER_MAGIC: [u8; 2] = *b"CN";

/// Offset of the payload within the frame
const PAYLOAD_OFFSET: usize = 6;

/// Offset of the checksum within the frame
const CRC_OFFSET: usize = FRAME_SIZE - 2;

/// CRC-16-CCITT: polynomial 0x1021, initial value 0x0000, no final xor
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Fail)]
pub enum DecodeError {
    /// The first two bytes are not the "CN" magic
    #[fail(display = "wrong frame header")]
    WrongHeader,
    /// Payload checksum mismatch
    #[fail(display = "frame CRC mismatch")]
    BadCrc,
}

/// One decoded frame. Multi byte payload fields are big endian; their
/// interpretation is command specific (see the `command` module).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Command code
    pub cmd: u8,
    /// 0 or a command specific flag (error, empty response)
    pub opt: u8,
    /// 1-based packet index within a sequence
    pub idx: u8,
    /// Total packets in the sequence
    pub cnt: u8,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Frame {
    /// Single packet frame with a zero padded payload
    pub fn new(cmd: u8, payload: &[u8]) -> Self {
        Self::sequenced(cmd, 1, 1, payload)
    }

    /// Frame `idx` of `cnt` with a zero padded payload
    pub fn sequenced(cmd: u8, idx: u8, cnt: u8, payload: &[u8]) -> Self {
        assert!(payload.len() <= PAYLOAD_SIZE);
        assert!(idx >= 1 && idx <= cnt);
        let mut padded = [0u8; PAYLOAD_SIZE];
        padded[..payload.len()].copy_from_slice(payload);
        Self {
            cmd,
            opt: 0,
            idx,
            cnt,
            payload: padded,
        }
    }

    /// Encode to the 40 byte wire form; this is total, every frame value
    /// has a valid encoding
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0..2].copy_from_slice(&HEADER_MAGIC);
        bytes[2] = self.cmd;
        bytes[3] = self.opt;
        bytes[4] = self.idx;
        bytes[5] = self.cnt;
        bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_SIZE].copy_from_slice(&self.payload);
        BigEndian::write_u16(&mut bytes[CRC_OFFSET..], crc16_ccitt(&self.payload));
        bytes
    }

    /// Decode a 40 byte wire frame, validating magic and checksum
    pub fn decode(bytes: &[u8; FRAME_SIZE]) -> Result<Self, DecodeError> {
        if bytes[0..2] != HEADER_MAGIC {
            return Err(DecodeError::WrongHeader);
        }
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_SIZE]);
        if BigEndian::read_u16(&bytes[CRC_OFFSET..]) != crc16_ccitt(&payload) {
            return Err(DecodeError::BadCrc);
        }
        Ok(Self {
            cmd: bytes[2],
            opt: bytes[3],
            idx: bytes[4],
            cnt: bytes[5],
            payload,
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Frame {{ cmd: {:#04x}, opt: {}, seq: {}/{}, payload: {} }}",
            self.cmd,
            self.opt,
            self.idx,
            self.cnt,
            hex::encode(&self.payload)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, RngCore};

    /// Check CRC-16-CCITT with init 0x0000 against known vectors
    #[test]
    fn test_crc16_vectors() {
        assert_eq!(crc16_ccitt(&[]), 0x0000);
        // "123456789" with poly 0x1021 and zero init is 0x31c3
        assert_eq!(crc16_ccitt(b"123456789"), 0x31c3);
        assert_eq!(crc16_ccitt(&[0x00]), 0x0000);
        assert_eq!(crc16_ccitt(&[0xff]), 0x1ef0);
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::sequenced(0x06, 2, 3, &[0xde, 0xad]);
        let bytes = frame.encode();

        assert_eq!(&bytes[0..2], b"CN");
        assert_eq!(bytes[2], 0x06);
        assert_eq!(bytes[3], 0x00);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[5], 3);
        assert_eq!(&bytes[6..8], &[0xde, 0xad]);
        // zero padding up to the checksum
        assert_eq!(&bytes[8..38], &[0u8; 30][..]);

        let expected_crc = crc16_ccitt(&bytes[6..38]);
        assert_eq!(&bytes[38..40], &expected_crc.to_be_bytes());
    }

    #[test]
    fn test_round_trip_random_payloads() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let mut payload = [0u8; PAYLOAD_SIZE];
            rng.fill_bytes(&mut payload);
            let frame = Frame {
                cmd: rng.gen(),
                opt: rng.gen(),
                idx: 1,
                cnt: 1,
                payload,
            };
            assert_eq!(Frame::decode(&frame.encode()), Ok(frame));
        }
    }

    #[test]
    fn test_decode_wrong_header() {
        let mut bytes = Frame::new(0x01, &[]).encode();
        bytes[0] = b'X';
        assert_eq!(Frame::decode(&bytes), Err(DecodeError::WrongHeader));

        let mut bytes = Frame::new(0x01, &[]).encode();
        bytes[1] = b'n';
        assert_eq!(Frame::decode(&bytes), Err(DecodeError::WrongHeader));
    }

    #[test]
    fn test_decode_crc_bit_flips() {
        let frame = Frame::new(0x02, &[0x12, 0x34, 0x56]);
        let good = frame.encode();

        // flipping any single bit of the checksum must be caught
        for bit in 0..16 {
            let mut corrupted = good;
            corrupted[CRC_OFFSET + bit / 8] ^= 1 << (bit % 8);
            assert_eq!(Frame::decode(&corrupted), Err(DecodeError::BadCrc));
        }

        // flipping any payload bit must be caught as well
        for bit in 0..(PAYLOAD_SIZE * 8) {
            let mut corrupted = good;
            corrupted[PAYLOAD_OFFSET + bit / 8] ^= 1 << (bit % 8);
            assert_eq!(Frame::decode(&corrupted), Err(DecodeError::BadCrc));
        }
    }
}
