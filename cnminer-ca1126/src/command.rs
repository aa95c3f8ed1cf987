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

//! Board command set on top of the frame codec: request builders and
//! response payload parsers. All multi byte payload integers are big
//! endian.

use crate::error::{ErrorKind, Result};
use crate::frame::{Frame, PAYLOAD_SIZE};

use byteorder::{BigEndian, ByteOrder};
use cn_bitcoin::BLOCK_HEADER_SIZE;

/// Number of frames one 80 byte header is split into
pub const WORK_FRAME_COUNT: usize = 3;

/// Option byte of a response frame that carries no data (e.g. an empty
/// nonce poll)
pub const OPT_EMPTY: u8 = 0x01;

/// Option byte of a response frame signaling a board side error
pub const OPT_ERROR: u8 = 0x02;

/// Command codes of the board link
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Poll a board slot; the response carries chip count and versions
    Detect = 0x01,
    /// Request temperatures
    Status = 0x02,
    /// Request candidate nonces
    Nonce = 0x03,
    /// Set chip frequency in MHz
    SetFrequency = 0x04,
    /// Set board voltage in mV
    SetVoltage = 0x05,
    /// Deliver the 80 byte header in three frames
    Work = 0x06,
    /// Put the board into its initializing state
    Reset = 0x07,
}

impl Command {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// DETECT request
pub fn detect() -> Frame {
    Frame::new(Command::Detect.code(), &[])
}

/// STATUS request
pub fn status() -> Frame {
    Frame::new(Command::Status.code(), &[])
}

/// NONCE request
pub fn nonce() -> Frame {
    Frame::new(Command::Nonce.code(), &[])
}

/// SET_FREQ request; frequency in MHz as a 32-bit big endian payload
pub fn set_frequency(mhz: u32) -> Frame {
    let mut payload = [0u8; 4];
    BigEndian::write_u32(&mut payload, mhz);
    Frame::new(Command::SetFrequency.code(), &payload)
}

/// SET_VOLTAGE request; voltage in mV as a 32-bit big endian payload
pub fn set_voltage(mv: u32) -> Frame {
    let mut payload = [0u8; 4];
    BigEndian::write_u32(&mut payload, mv);
    Frame::new(Command::SetVoltage.code(), &payload)
}

/// RESET request
pub fn reset() -> Frame {
    Frame::new(Command::Reset.code(), &[])
}

/// WORK request: the header split across three sequential frames
/// (32 + 32 + 16 bytes, the last one zero padded)
pub fn work(header: &[u8; BLOCK_HEADER_SIZE]) -> [Frame; WORK_FRAME_COUNT] {
    let cmd = Command::Work.code();
    let cnt = WORK_FRAME_COUNT as u8;
    [
        Frame::sequenced(cmd, 1, cnt, &header[0..PAYLOAD_SIZE]),
        Frame::sequenced(cmd, 2, cnt, &header[PAYLOAD_SIZE..2 * PAYLOAD_SIZE]),
        Frame::sequenced(cmd, 3, cnt, &header[2 * PAYLOAD_SIZE..]),
    ]
}

fn check_response(board: usize, frame: &Frame, command: Command) -> Result<()> {
    if frame.cmd != command.code() {
        return Err(ErrorKind::Board(
            board,
            format!(
                "unexpected response type {:#04x} to {:?}",
                frame.cmd, command
            ),
        )
        .into());
    }
    if frame.opt == OPT_ERROR {
        return Err(ErrorKind::Board(board, format!("{:?} refused", command)).into());
    }
    Ok(())
}

/// DETECT response payload: chip count, firmware and hardware revision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectResponse {
    pub chip_count: u16,
    pub firmware_version: u16,
    pub hardware_version: u16,
}

impl DetectResponse {
    pub fn parse(board: usize, frame: &Frame) -> Result<Self> {
        check_response(board, frame, Command::Detect)?;
        let chip_count = BigEndian::read_u16(&frame.payload[0..2]);
        if chip_count == 0 {
            return Err(ErrorKind::Board(board, "detect reports no chips".to_string()).into());
        }
        Ok(Self {
            chip_count,
            firmware_version: BigEndian::read_u16(&frame.payload[2..4]),
            hardware_version: BigEndian::read_u16(&frame.payload[4..6]),
        })
    }
}

/// STATUS response payload: inlet and outlet temperatures in tenths of a
/// degree celsius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusResponse {
    pub temp_inlet: i32,
    pub temp_outlet: i32,
}

impl StatusResponse {
    pub fn parse(board: usize, frame: &Frame) -> Result<Self> {
        check_response(board, frame, Command::Status)?;
        Ok(Self {
            temp_inlet: BigEndian::read_u16(&frame.payload[0..2]) as i32,
            temp_outlet: BigEndian::read_u16(&frame.payload[2..4]) as i32,
        })
    }

    /// Hotter of the two measuring points
    #[inline]
    pub fn temp_max(&self) -> i32 {
        self.temp_inlet.max(self.temp_outlet)
    }
}

/// One candidate nonce with the chip/core that found it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonceResponse {
    pub nonce: u32,
    pub chip: u8,
    pub core: u8,
}

impl NonceResponse {
    /// Parse one NONCE response frame; `None` for the empty marker
    pub fn parse(board: usize, frame: &Frame) -> Result<Option<Self>> {
        check_response(board, frame, Command::Nonce)?;
        if frame.opt == OPT_EMPTY {
            return Ok(None);
        }
        Ok(Some(Self {
            nonce: BigEndian::read_u32(&frame.payload[0..4]),
            chip: frame.payload[4],
            core: frame.payload[5],
        }))
    }
}

/// Check a plain acknowledge (SET_FREQ, SET_VOLTAGE, WORK, RESET)
pub fn parse_ack(board: usize, frame: &Frame, command: Command) -> Result<()> {
    check_response(board, frame, command)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_frequency_payload_is_big_endian() {
        let frame = set_frequency(650);
        assert_eq!(&frame.payload[0..4], &[0x00, 0x00, 0x02, 0x8a]);
        assert_eq!(frame.cmd, 0x04);

        let frame = set_voltage(900);
        assert_eq!(&frame.payload[0..4], &[0x00, 0x00, 0x03, 0x84]);
    }

    #[test]
    fn test_work_split() {
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        for (index, byte) in header.iter_mut().enumerate() {
            *byte = index as u8;
        }
        let frames = work(&header);

        assert_eq!(frames[0].idx, 1);
        assert_eq!(frames[1].idx, 2);
        assert_eq!(frames[2].idx, 3);
        for frame in frames.iter() {
            assert_eq!(frame.cnt, 3);
            assert_eq!(frame.cmd, Command::Work.code());
        }

        assert_eq!(&frames[0].payload[..], &header[0..32]);
        assert_eq!(&frames[1].payload[..], &header[32..64]);
        assert_eq!(&frames[2].payload[..16], &header[64..80]);
        // the tail of the last frame is zero padded
        assert_eq!(&frames[2].payload[16..], &[0u8; 16][..]);
    }

    #[test]
    fn test_status_parse() {
        // inlet 60.0 C, outlet 75.0 C
        let mut payload = [0u8; 4];
        payload[0..2].copy_from_slice(&[0x02, 0x58]);
        payload[2..4].copy_from_slice(&[0x02, 0xee]);
        let frame = Frame::new(Command::Status.code(), &payload);

        let status = StatusResponse::parse(0, &frame).expect("valid status");
        assert_eq!(status.temp_inlet, 600);
        assert_eq!(status.temp_outlet, 750);
        assert_eq!(status.temp_max(), 750);
    }

    #[test]
    fn test_detect_parse() {
        let payload = [0x00u8, 0x3c, 0x01, 0x02, 0x00, 0x11];
        let frame = Frame::new(Command::Detect.code(), &payload);
        let detect = DetectResponse::parse(2, &frame).expect("valid detect");
        assert_eq!(detect.chip_count, 60);
        assert_eq!(detect.firmware_version, 0x0102);
        assert_eq!(detect.hardware_version, 0x0011);

        // zero chips is nonsense
        let frame = Frame::new(Command::Detect.code(), &[]);
        assert!(DetectResponse::parse(2, &frame).is_err());
    }

    #[test]
    fn test_nonce_parse() {
        let payload = [0x12u8, 0x34, 0xab, 0xcd, 0x07, 0x2a];
        let frame = Frame::new(Command::Nonce.code(), &payload);
        let nonce = NonceResponse::parse(1, &frame)
            .expect("valid nonce frame")
            .expect("nonce present");
        assert_eq!(nonce.nonce, 0x1234abcd);
        assert_eq!(nonce.chip, 0x07);
        assert_eq!(nonce.core, 0x2a);

        // empty marker
        let mut frame = Frame::new(Command::Nonce.code(), &[]);
        frame.opt = OPT_EMPTY;
        assert_eq!(NonceResponse::parse(1, &frame).expect("empty poll"), None);

        // board side error flag
        let mut frame = Frame::new(Command::Nonce.code(), &[]);
        frame.opt = OPT_ERROR;
        assert!(NonceResponse::parse(1, &frame).is_err());

        // mismatched response type
        let frame = Frame::new(Command::Status.code(), &[]);
        assert!(NonceResponse::parse(1, &frame).is_err());
    }
}
