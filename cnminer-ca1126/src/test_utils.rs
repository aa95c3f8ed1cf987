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

//! Scripted hash boards behind an in-memory transport. Tests configure the
//! board models (chip counts, temperatures, queued nonces, fault injection)
//! and drive the real link/dispatcher code against them.

use crate::command::{Command, OPT_EMPTY};
use crate::error::Result;
use crate::frame::{Frame, FRAME_SIZE, PAYLOAD_SIZE};
use crate::transport::{BoardSelector, Transport};

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use cn_bitcoin::BLOCK_HEADER_SIZE;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

/// Behavior model of one board slot. A `chip_count` of zero models an
/// empty slot that never answers.
#[derive(Debug, Default)]
pub struct TestBoardModel {
    pub chip_count: u16,
    pub firmware_version: u16,
    pub hardware_version: u16,
    /// Temperatures in tenths of a degree celsius
    pub temp_inlet: i32,
    pub temp_outlet: i32,
    /// Nonces handed out by subsequent NONCE polls
    pub nonces: VecDeque<u32>,
    /// Last accepted set points
    pub frequency: Option<u32>,
    pub voltage: Option<u32>,
    /// Headers reassembled from WORK sequences
    pub received_work: Vec<[u8; BLOCK_HEADER_SIZE]>,
    pub reset_count: usize,
    /// Fault injection: corrupt the CRC of the next N responses
    pub corrupt_next_responses: usize,
    /// Fault injection: swallow the next N responses entirely
    pub drop_next_responses: usize,
    /// Junk emitted in front of the next response (resync exercise)
    pub garbage_prefix: Vec<u8>,
    work_buffer: Vec<u8>,
}

/// Shared state of the simulated bus
#[derive(Debug, Default)]
pub struct TestLinkState {
    pub boards: Vec<TestBoardModel>,
    /// Every board select in order of assertion
    pub select_log: Vec<usize>,
    selected: Option<usize>,
    rx: VecDeque<u8>,
}

pub type SharedTestLink = Arc<StdMutex<TestLinkState>>;

impl TestLinkState {
    fn respond(&mut self, board: usize, frame: Frame) {
        let garbage = std::mem::take(&mut self.boards[board].garbage_prefix);
        self.rx.extend(garbage);

        let mut bytes = frame.encode();
        if self.boards[board].corrupt_next_responses > 0 {
            self.boards[board].corrupt_next_responses -= 1;
            // flip one payload byte after the checksum was computed
            bytes[6] ^= 0xff;
        }
        self.rx.extend(bytes.iter());
    }

    fn handle_frame(&mut self, frame: Frame) {
        let board = match self.selected {
            Some(board) => board,
            None => return,
        };
        if self.boards[board].chip_count == 0 {
            // empty slot, nobody home
            return;
        }
        if self.boards[board].drop_next_responses > 0 {
            self.boards[board].drop_next_responses -= 1;
            return;
        }

        match frame.cmd {
            code if code == Command::Detect.code() => {
                let model = &self.boards[board];
                let mut payload = [0u8; 6];
                BigEndian::write_u16(&mut payload[0..2], model.chip_count);
                BigEndian::write_u16(&mut payload[2..4], model.firmware_version);
                BigEndian::write_u16(&mut payload[4..6], model.hardware_version);
                self.respond(board, Frame::new(Command::Detect.code(), &payload));
            }
            code if code == Command::Status.code() => {
                let model = &self.boards[board];
                let mut payload = [0u8; 4];
                BigEndian::write_u16(&mut payload[0..2], model.temp_inlet as u16);
                BigEndian::write_u16(&mut payload[2..4], model.temp_outlet as u16);
                self.respond(board, Frame::new(Command::Status.code(), &payload));
            }
            code if code == Command::Nonce.code() => {
                let pending: Vec<u32> = self.boards[board].nonces.drain(..).collect();
                if pending.is_empty() {
                    let mut frame = Frame::new(Command::Nonce.code(), &[]);
                    frame.opt = OPT_EMPTY;
                    self.respond(board, frame);
                } else {
                    let count = pending.len() as u8;
                    for (index, nonce) in pending.into_iter().enumerate() {
                        let mut payload = [0u8; 6];
                        BigEndian::write_u32(&mut payload[0..4], nonce);
                        payload[4] = 0x01;
                        payload[5] = 0x02;
                        let frame = Frame::sequenced(
                            Command::Nonce.code(),
                            index as u8 + 1,
                            count,
                            &payload,
                        );
                        self.respond(board, frame);
                    }
                }
            }
            code if code == Command::SetFrequency.code() => {
                let value = BigEndian::read_u32(&frame.payload[0..4]);
                self.boards[board].frequency = Some(value);
                self.respond(board, Frame::new(Command::SetFrequency.code(), &[]));
            }
            code if code == Command::SetVoltage.code() => {
                let value = BigEndian::read_u32(&frame.payload[0..4]);
                self.boards[board].voltage = Some(value);
                self.respond(board, Frame::new(Command::SetVoltage.code(), &[]));
            }
            code if code == Command::Work.code() => {
                let model = &mut self.boards[board];
                if frame.idx == 1 {
                    model.work_buffer.clear();
                }
                let remaining = BLOCK_HEADER_SIZE - model.work_buffer.len().min(BLOCK_HEADER_SIZE);
                let take = remaining.min(PAYLOAD_SIZE);
                model.work_buffer.extend_from_slice(&frame.payload[..take]);
                if frame.idx == frame.cnt {
                    if model.work_buffer.len() == BLOCK_HEADER_SIZE {
                        let mut header = [0u8; BLOCK_HEADER_SIZE];
                        header.copy_from_slice(&model.work_buffer);
                        model.received_work.push(header);
                    }
                    model.work_buffer.clear();
                    self.respond(board, Frame::new(Command::Work.code(), &[]));
                }
            }
            code if code == Command::Reset.code() => {
                self.boards[board].reset_count += 1;
                self.boards[board].nonces.clear();
                self.respond(board, Frame::new(Command::Reset.code(), &[]));
            }
            _ => {}
        }
    }
}

/// Transport half of the simulated bus
pub struct TestTransport {
    state: SharedTestLink,
}

#[async_trait]
impl Transport for TestTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().expect("test link state poisoned");
        for chunk in bytes.chunks(FRAME_SIZE) {
            if chunk.len() == FRAME_SIZE {
                let mut frame_bytes = [0u8; FRAME_SIZE];
                frame_bytes.copy_from_slice(chunk);
                if let Ok(frame) = Frame::decode(&frame_bytes) {
                    state.handle_frame(frame);
                }
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut state = self.state.lock().expect("test link state poisoned");
                if !state.rx.is_empty() {
                    let count = buf.len().min(state.rx.len());
                    for slot in buf.iter_mut().take(count) {
                        *slot = state.rx.pop_front().expect("rx byte");
                    }
                    return Ok(count);
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// Selector half of the simulated bus
pub struct TestSelector {
    state: SharedTestLink,
    count: usize,
}

impl BoardSelector for TestSelector {
    fn board_count(&self) -> usize {
        self.count
    }

    fn select(&mut self, board: usize) -> Result<()> {
        let mut state = self.state.lock().expect("test link state poisoned");
        state.selected = Some(board);
        state.select_log.push(board);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut state = self.state.lock().expect("test link state poisoned");
        state.selected = None;
        Ok(())
    }
}

/// Build a simulated bus with `board_count` empty slots. Tests populate the
/// returned state and pass the transport/selector into `link::Link`.
pub fn test_link(
    board_count: usize,
) -> (SharedTestLink, Box<dyn Transport>, Box<dyn BoardSelector>) {
    let mut state = TestLinkState::default();
    state
        .boards
        .resize_with(board_count, TestBoardModel::default);
    let state = Arc::new(StdMutex::new(state));
    (
        state.clone(),
        Box::new(TestTransport {
            state: state.clone(),
        }),
        Box::new(TestSelector {
            state: state.clone(),
            count: board_count,
        }),
    )
}
