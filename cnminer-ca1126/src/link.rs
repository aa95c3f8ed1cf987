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

//! Board link driver: owns the shared bus transport and the board select,
//! and runs request/response transactions one at a time.

use cn_logging::macros::*;

use crate::command::{self, Command};
use crate::error::{ErrorKind, Result};
use crate::frame::{DecodeError, Frame, FRAME_SIZE, HEADER_MAGIC};
use crate::transport::{BoardSelector, Transport};

use cn_bitcoin::BLOCK_HEADER_SIZE;

use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Per command response deadlines
pub const RESET_TIMEOUT: Duration = Duration::from_millis(1000);
pub const NONCE_TIMEOUT: Duration = Duration::from_millis(50);
pub const STATUS_TIMEOUT: Duration = Duration::from_millis(100);
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(200);

/// Size of one bus read
const RX_CHUNK_SIZE: usize = 256;

struct Bus {
    transport: Box<dyn Transport>,
    selector: Box<dyn BoardSelector>,
    rx: Vec<u8>,
}

impl Bus {
    /// Drop garbage in front of the next frame boundary. Bytes before the
    /// first "CN" occurrence are discarded; a trailing 'C' is kept since it
    /// may be the first half of a boundary still in flight.
    fn resync(&mut self) -> usize {
        if self.rx.len() < 2 || self.rx[0..2] == HEADER_MAGIC {
            return 0;
        }
        let dropped = match self.rx.windows(2).position(|pair| pair == HEADER_MAGIC) {
            Some(position) => position,
            None => {
                if self.rx.last() == Some(&HEADER_MAGIC[0]) {
                    self.rx.len() - 1
                } else {
                    self.rx.len()
                }
            }
        };
        self.rx.drain(..dropped);
        dropped
    }

    /// Read one well formed frame before `deadline`
    async fn read_frame(&mut self, deadline: Instant) -> Result<Frame> {
        let mut chunk = [0u8; RX_CHUNK_SIZE];
        loop {
            let dropped = self.resync();
            if dropped > 0 {
                debug!("link: dropped {} bytes resyncing to frame boundary", dropped);
            }

            if self.rx.len() >= FRAME_SIZE && self.rx[0..2] == HEADER_MAGIC {
                let mut bytes = [0u8; FRAME_SIZE];
                bytes.copy_from_slice(&self.rx[..FRAME_SIZE]);
                self.rx.drain(..FRAME_SIZE);
                match Frame::decode(&bytes) {
                    Ok(frame) => return Ok(frame),
                    Err(DecodeError::BadCrc) => {
                        return Err(ErrorKind::Frame(DecodeError::BadCrc).into())
                    }
                    // cannot happen, the buffer was aligned above
                    Err(DecodeError::WrongHeader) => continue,
                }
            }

            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| ErrorKind::Timeout("response read".to_string()))?;
            let count = timeout(remaining, self.transport.read(&mut chunk))
                .await
                .map_err(|_| ErrorKind::Timeout("response read".to_string()))??;
            self.rx.extend_from_slice(&chunk[..count]);
        }
    }
}

/// The multi-drop board link. All transactions are serialized by an
/// internal mutex; a transaction selects the target board, performs the
/// write and collects the response frames.
pub struct Link {
    bus: Mutex<Bus>,
    board_count: usize,
    /// Transactions currently on the wire and the highest value ever
    /// observed; the latter must never exceed one
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Link {
    pub fn new(transport: Box<dyn Transport>, selector: Box<dyn BoardSelector>) -> Self {
        let board_count = selector.board_count();
        Self {
            bus: Mutex::new(Bus {
                transport,
                selector,
                rx: Vec::with_capacity(4 * FRAME_SIZE),
            }),
            board_count,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn board_count(&self) -> usize {
        self.board_count
    }

    /// Highest number of concurrently outstanding transactions seen so far
    pub fn max_outstanding(&self) -> usize {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    fn transaction_enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    fn transaction_leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// One transaction: assert the board select, send `writes`, then read
    /// frames until the first one matching the request type arrives. When
    /// that frame announces a sequence (cnt > 1), the remaining frames are
    /// collected as well.
    async fn transact_inner(
        &self,
        board: usize,
        writes: &[Frame],
        expect: Command,
        deadline: Duration,
    ) -> Result<Vec<Frame>> {
        assert!(board < self.board_count, "board index out of range");
        let mut bus = self.bus.lock().await;
        self.transaction_enter();
        let result = Self::run_transaction(&mut bus, board, writes, expect, deadline).await;
        self.transaction_leave();
        let released = bus.selector.release();
        match (result, released) {
            (Ok(frames), Ok(())) => Ok(frames),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    async fn run_transaction(
        bus: &mut Bus,
        board: usize,
        writes: &[Frame],
        expect: Command,
        deadline: Duration,
    ) -> Result<Vec<Frame>> {
        bus.selector.select(board)?;
        // stale bytes of a previous board must not be read back
        bus.rx.clear();

        for frame in writes {
            bus.transport.write(&frame.encode()).await?;
        }

        let deadline = Instant::now() + deadline;
        let first = loop {
            let frame = bus.read_frame(deadline).await?;
            if frame.cmd == expect.code() {
                break frame;
            }
            debug!(
                "link: board {} discarding unexpected frame {:?}",
                board, frame
            );
        };

        let expected_count = first.cnt.max(1) as usize;
        let mut frames = vec![first];
        while frames.len() < expected_count {
            let frame = bus.read_frame(deadline).await?;
            if frame.cmd == expect.code() {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Single response transaction
    pub async fn transact(
        &self,
        board: usize,
        request: Frame,
        expect: Command,
        deadline: Duration,
    ) -> Result<Frame> {
        let frames = self
            .transact_inner(board, &[request], expect, deadline)
            .await?;
        Ok(frames[0])
    }

    /// Transaction whose response may span several frames (NONCE)
    pub async fn transact_sequence(
        &self,
        board: usize,
        request: Frame,
        expect: Command,
        deadline: Duration,
    ) -> Result<Vec<Frame>> {
        self.transact_inner(board, &[request], expect, deadline)
            .await
    }

    /// Deliver one 80 byte header as three WORK frames and wait for the ack
    pub async fn send_work(&self, board: usize, header: &[u8; BLOCK_HEADER_SIZE]) -> Result<()> {
        let frames = command::work(header);
        let response = self
            .transact_inner(board, &frames, Command::Work, COMMAND_TIMEOUT)
            .await?;
        command::parse_ack(board, &response[0], Command::Work)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::test_link;

    use std::sync::Arc;

    #[tokio::test]
    async fn test_detect_transaction() {
        let (state, transport, selector) = test_link(2);
        {
            let mut state = state.lock().unwrap();
            state.boards[1].chip_count = 26;
            state.boards[1].firmware_version = 0x0103;
        }
        let link = Link::new(transport, selector);

        let frame = link
            .transact(1, command::detect(), Command::Detect, COMMAND_TIMEOUT)
            .await
            .expect("detect transaction");
        let detect = command::DetectResponse::parse(1, &frame).expect("detect payload");
        assert_eq!(detect.chip_count, 26);
        assert_eq!(detect.firmware_version, 0x0103);

        // board select was asserted for the right slot
        assert_eq!(state.lock().unwrap().select_log, vec![1]);
    }

    #[tokio::test]
    async fn test_resync_on_garbage() {
        let (state, transport, selector) = test_link(1);
        {
            let mut state = state.lock().unwrap();
            state.boards[0].chip_count = 30;
            state.boards[0].garbage_prefix = b"some line noise C".to_vec();
        }
        let link = Link::new(transport, selector);

        let frame = link
            .transact(0, command::detect(), Command::Detect, COMMAND_TIMEOUT)
            .await
            .expect("detect with resync");
        assert!(command::DetectResponse::parse(0, &frame).is_ok());
    }

    #[tokio::test]
    async fn test_crc_error_is_reported() {
        let (state, transport, selector) = test_link(1);
        {
            let mut state = state.lock().unwrap();
            state.boards[0].chip_count = 30;
            state.boards[0].corrupt_next_responses = 1;
        }
        let link = Link::new(transport, selector);

        let result = link
            .transact(0, command::detect(), Command::Detect, COMMAND_TIMEOUT)
            .await;
        let error = result.expect_err("corrupted response must fail");
        assert!(error.is_link_transient());

        // the next transaction goes through again
        let frame = link
            .transact(0, command::detect(), Command::Detect, COMMAND_TIMEOUT)
            .await
            .expect("clean retry");
        assert!(command::DetectResponse::parse(0, &frame).is_ok());
    }

    #[tokio::test]
    async fn test_dropped_response_times_out() {
        let (state, transport, selector) = test_link(1);
        {
            let mut state = state.lock().unwrap();
            state.boards[0].chip_count = 30;
            state.boards[0].drop_next_responses = 1;
        }
        let link = Link::new(transport, selector);

        let started = Instant::now();
        let result = link
            .transact(0, command::nonce(), Command::Nonce, NONCE_TIMEOUT)
            .await;
        let error = result.expect_err("dropped response must time out");
        assert!(error.is_link_transient());
        assert!(started.elapsed() >= NONCE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_single_outstanding_transaction() {
        let (state, transport, selector) = test_link(4);
        {
            let mut state = state.lock().unwrap();
            for board in state.boards.iter_mut() {
                board.chip_count = 30;
            }
        }
        let link = Arc::new(Link::new(transport, selector));

        let mut tasks = Vec::new();
        for round in 0..32 {
            let link = link.clone();
            tasks.push(tokio::spawn(async move {
                link.transact(
                    round % 4,
                    command::detect(),
                    Command::Detect,
                    COMMAND_TIMEOUT,
                )
                .await
                .expect("concurrent detect")
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }

        assert_eq!(link.max_outstanding(), 1);
    }

    #[tokio::test]
    async fn test_work_delivery_reassembles_header() {
        let (state, transport, selector) = test_link(1);
        state.lock().unwrap().boards[0].chip_count = 30;
        let link = Link::new(transport, selector);

        let mut header = [0u8; BLOCK_HEADER_SIZE];
        for (index, byte) in header.iter_mut().enumerate() {
            *byte = (index as u8) ^ 0x5a;
        }
        link.send_work(0, &header).await.expect("work delivery");

        let state = state.lock().unwrap();
        assert_eq!(state.boards[0].received_work, vec![header]);
    }
}
