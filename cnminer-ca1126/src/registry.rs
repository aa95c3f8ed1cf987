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

//! Registry of hash boards and their runtime state. All boards live behind
//! one supervisor mutex that the dispatcher and the thermal monitor share.

use tokio::sync::{Mutex, MutexGuard};

/// Consecutive link failures after which a board is declared broken
pub const POLL_ERROR_LIMIT: u32 = 3;

/// State machine of one board slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardState {
    /// Nothing answered DETECT in this slot
    Absent,
    /// Board answered; chips not brought up yet
    Initializing,
    /// Configured and waiting for its first work
    Ready,
    /// Actively hashing
    Mining,
    /// Too many link failures; a reset is pending
    Error,
    /// Thermally disabled; receives no work until the monitor releases it
    Overheat,
}

/// One physical hash board
#[derive(Debug, Clone)]
pub struct Board {
    pub index: usize,
    pub state: BoardState,
    pub chip_count: usize,
    pub active_chips: usize,
    pub firmware_version: u16,
    pub hardware_version: u16,
    /// Current chip frequency in MHz
    pub frequency_mhz: u32,
    /// Frequency the configuration asked for; the thermal governor will not
    /// boost past it
    pub configured_frequency_mhz: u32,
    pub voltage_mv: u32,
    /// Temperatures in tenths of a degree celsius; None until the first
    /// STATUS response
    pub temp_inlet: Option<i32>,
    pub temp_outlet: Option<i32>,
    pub hardware_error_count: u64,
    pub accepted_count: u64,
    pub rejected_count: u64,
    /// Job id of the last WORK delivery
    pub last_job_id: Option<String>,
    /// Consecutive link failures
    poll_errors: u32,
}

impl Board {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: BoardState::Absent,
            chip_count: 0,
            active_chips: 0,
            firmware_version: 0,
            hardware_version: 0,
            frequency_mhz: 0,
            configured_frequency_mhz: 0,
            voltage_mv: 0,
            temp_inlet: None,
            temp_outlet: None,
            hardware_error_count: 0,
            accepted_count: 0,
            rejected_count: 0,
            last_job_id: None,
            poll_errors: 0,
        }
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        self.state != BoardState::Absent
    }

    /// Board may be given work
    #[inline]
    pub fn can_mine(&self) -> bool {
        matches!(self.state, BoardState::Ready | BoardState::Mining)
    }

    /// Hottest measuring point, if the board reported any temperature yet
    pub fn temp_max(&self) -> Option<i32> {
        match (self.temp_inlet, self.temp_outlet) {
            (Some(inlet), Some(outlet)) => Some(inlet.max(outlet)),
            (Some(inlet), None) => Some(inlet),
            (None, Some(outlet)) => Some(outlet),
            (None, None) => None,
        }
    }

    /// Account one transient link failure. Returns true when the limit is
    /// reached and the board has been put into the `Error` state.
    pub fn note_link_failure(&mut self) -> bool {
        self.poll_errors += 1;
        if self.poll_errors >= POLL_ERROR_LIMIT && self.state != BoardState::Error {
            self.state = BoardState::Error;
            return true;
        }
        false
    }

    /// A successful transaction clears the failure streak
    #[inline]
    pub fn note_link_success(&mut self) {
        self.poll_errors = 0;
    }

    /// Work delivery memo: does this board still hash `job_id`?
    pub fn has_job(&self, job_id: &str) -> bool {
        self.last_job_id.as_deref() == Some(job_id)
    }
}

/// All board slots behind a single supervisor mutex
pub struct Registry {
    boards: Mutex<Vec<Board>>,
}

impl Registry {
    pub fn new(board_count: usize) -> Self {
        Self {
            boards: Mutex::new((0..board_count).map(Board::new).collect()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Vec<Board>> {
        self.boards.lock().await
    }

    /// Non-blocking lock for synchronous construction paths
    pub fn try_lock(&self) -> Result<MutexGuard<'_, Vec<Board>>, tokio::sync::TryLockError> {
        self.boards.try_lock()
    }

    /// Snapshot of all boards for status reporting
    pub async fn snapshot(&self) -> Vec<Board> {
        self.boards.lock().await.clone()
    }

    /// Maximum temperature over all present boards, tenths of a degree.
    /// None when no board has reported yet.
    pub async fn temp_max(&self) -> Option<i32> {
        self.boards
            .lock()
            .await
            .iter()
            .filter(|board| board.is_present())
            .filter_map(Board::temp_max)
            .max()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_board_failure_streak() {
        let mut board = Board::new(0);
        board.state = BoardState::Mining;

        assert!(!board.note_link_failure());
        assert!(!board.note_link_failure());
        // an intervening success resets the streak
        board.note_link_success();
        assert!(!board.note_link_failure());
        assert!(!board.note_link_failure());
        assert!(board.note_link_failure());
        assert_eq!(board.state, BoardState::Error);
    }

    #[test]
    fn test_board_temp_max() {
        let mut board = Board::new(0);
        assert_eq!(board.temp_max(), None);
        board.temp_inlet = Some(600);
        assert_eq!(board.temp_max(), Some(600));
        board.temp_outlet = Some(750);
        assert_eq!(board.temp_max(), Some(750));
    }

    #[tokio::test]
    async fn test_registry_temp_max_skips_absent() {
        let registry = Registry::new(3);
        {
            let mut boards = registry.lock().await;
            boards[0].state = BoardState::Mining;
            boards[0].temp_inlet = Some(600);
            boards[0].temp_outlet = Some(680);
            // absent board with a bogus stale reading must be ignored
            boards[1].temp_inlet = Some(990);
            boards[2].state = BoardState::Ready;
        }
        assert_eq!(registry.temp_max().await, Some(680));
    }

    #[test]
    fn test_board_job_memo() {
        let mut board = Board::new(1);
        assert!(!board.has_job("j1"));
        board.last_job_id = Some("j1".to_string());
        assert!(board.has_job("j1"));
        assert!(!board.has_job("j2"));
    }
}
