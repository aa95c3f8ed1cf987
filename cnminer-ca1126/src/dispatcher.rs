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

//! Work dispatcher: keeps every healthy board supplied with the current
//! job, collects candidate nonces, validates them against the job target
//! and forwards shares for submission. Board bring-up and recovery run in
//! the same loop so a board slot walks its whole state machine from here.

use cn_logging::macros::*;

use crate::command::{self, Command, DetectResponse, NonceResponse, StatusResponse};
use crate::error::Error;
use crate::link::{self, Link};
use crate::registry::{BoardState, Registry};
use crate::{check_frequency, check_voltage};

use cnminer::{job, stats, sync, work};

use tokio::time::{sleep, Instant};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pause between dispatch passes
const DISPATCH_TICK: Duration = Duration::from_millis(10);
/// How often STATUS is polled per board
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How often an empty slot is re-probed with DETECT
const ABSENT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    link: Arc<Link>,
    registry: Arc<Registry>,
    stats: Arc<stats::Mining>,
    /// Cleared by the thermal monitor during an emergency
    mining_enabled: Arc<AtomicBool>,
    job_receiver: work::JobReceiver,
    solution_sender: work::SolutionSender,
    /// Header generator of the current job
    assembler: Option<job::Assembler>,
    /// Last assignment delivered per board; nonces are validated against it
    assignments: HashMap<usize, work::Assignment>,
    last_status_poll: Instant,
    last_absent_probe: HashMap<usize, Instant>,
}

impl Dispatcher {
    pub fn new(
        link: Arc<Link>,
        registry: Arc<Registry>,
        stats: Arc<stats::Mining>,
        mining_enabled: Arc<AtomicBool>,
        job_receiver: work::JobReceiver,
        solution_sender: work::SolutionSender,
    ) -> Self {
        Self {
            link,
            registry,
            stats,
            mining_enabled,
            job_receiver,
            solution_sender,
            assembler: None,
            assignments: HashMap::new(),
            last_status_poll: Instant::now()
                .checked_sub(STATUS_POLL_INTERVAL)
                .unwrap_or_else(Instant::now),
            last_absent_probe: HashMap::new(),
        }
    }

    /// Account one failed transaction against the board; three in a row
    /// break it
    async fn handle_link_error(&self, board: usize, error: &Error) {
        if error.is_link_transient() {
            let broke = self.registry.lock().await[board].note_link_failure();
            if broke {
                warn!("dispatcher: board {} broken ({}), resetting", board, error);
            } else {
                debug!("dispatcher: board {} link error: {}", board, error);
            }
        } else {
            warn!("dispatcher: board {}: {}", board, error);
        }
    }

    /// DETECT an absent slot; a response moves it to `Initializing`
    async fn probe_board(&mut self, board: usize) {
        let due = self
            .last_absent_probe
            .get(&board)
            .map(|last| last.elapsed() >= ABSENT_PROBE_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_absent_probe.insert(board, Instant::now());

        let response = self
            .link
            .transact(
                board,
                command::detect(),
                Command::Detect,
                link::COMMAND_TIMEOUT,
            )
            .await
            .and_then(|frame| DetectResponse::parse(board, &frame));
        match response {
            Ok(detect) => {
                info!(
                    "dispatcher: board {} detected: {} chips, fw {:#06x}, hw {:#06x}",
                    board, detect.chip_count, detect.firmware_version, detect.hardware_version
                );
                let mut boards = self.registry.lock().await;
                let entry = &mut boards[board];
                entry.chip_count = detect.chip_count as usize;
                entry.active_chips = detect.chip_count as usize;
                entry.firmware_version = detect.firmware_version;
                entry.hardware_version = detect.hardware_version;
                entry.state = BoardState::Initializing;
                entry.note_link_success();
            }
            Err(_) => {
                // empty slot; no logging here, probes repeat forever
            }
        }
    }

    /// Apply the configured set points to a freshly detected board
    async fn configure_board(&mut self, board: usize) {
        let (frequency, voltage) = {
            let boards = self.registry.lock().await;
            (
                boards[board].configured_frequency_mhz,
                boards[board].voltage_mv,
            )
        };
        if check_frequency(frequency).is_err() || check_voltage(voltage).is_err() {
            error!(
                "dispatcher: board {} has invalid set points ({} MHz, {} mV)",
                board, frequency, voltage
            );
            return;
        }

        let result = async {
            self.link
                .transact(
                    board,
                    command::set_frequency(frequency),
                    Command::SetFrequency,
                    link::COMMAND_TIMEOUT,
                )
                .await
                .and_then(|frame| command::parse_ack(board, &frame, Command::SetFrequency))?;
            self.link
                .transact(
                    board,
                    command::set_voltage(voltage),
                    Command::SetVoltage,
                    link::COMMAND_TIMEOUT,
                )
                .await
                .and_then(|frame| command::parse_ack(board, &frame, Command::SetVoltage))
        }
        .await;

        match result {
            Ok(()) => {
                info!(
                    "dispatcher: board {} ready ({} MHz, {} mV)",
                    board, frequency, voltage
                );
                let mut boards = self.registry.lock().await;
                boards[board].frequency_mhz = frequency;
                boards[board].state = BoardState::Ready;
                boards[board].note_link_success();
            }
            Err(e) => self.handle_link_error(board, &e).await,
        }
    }

    /// RESET a broken board; an unresponsive board is given up as absent
    async fn recover_board(&mut self, board: usize) {
        let result = self
            .link
            .transact(board, command::reset(), Command::Reset, link::RESET_TIMEOUT)
            .await
            .and_then(|frame| command::parse_ack(board, &frame, Command::Reset));
        let mut boards = self.registry.lock().await;
        match result {
            Ok(()) => {
                info!("dispatcher: board {} reset", board);
                boards[board].state = BoardState::Initializing;
                boards[board].last_job_id = None;
                boards[board].note_link_success();
            }
            Err(e) => {
                warn!(
                    "dispatcher: board {} unresponsive after reset ({}), marking absent",
                    board, e
                );
                boards[board].state = BoardState::Absent;
            }
        }
        self.assignments.remove(&board);
    }

    /// Send the current job to one board
    async fn deliver_work(&mut self, board: usize) {
        let assignment = self
            .assembler
            .as_mut()
            .expect("BUG: work delivery without a job")
            .next_work();
        match self.link.send_work(board, &assignment.header).await {
            Ok(()) => {
                debug!(
                    "dispatcher: board {} got job {} (extranonce2 {})",
                    board,
                    assignment.job.id,
                    assignment.extranonce2.to_hex()
                );
                let mut boards = self.registry.lock().await;
                boards[board].last_job_id = Some(assignment.job.id.clone());
                boards[board].state = BoardState::Mining;
                boards[board].note_link_success();
                drop(boards);
                self.assignments.insert(board, assignment);
            }
            Err(e) => self.handle_link_error(board, &e).await,
        }
    }

    /// Validate one candidate nonce against the job target
    async fn process_nonce(&self, board: usize, response: NonceResponse) {
        let assignment = match self.assignments.get(&board) {
            Some(assignment) => assignment,
            // nonce for a job whose assignment is already gone
            None => return,
        };
        if assignment.job.is_stale() {
            self.stats.account_stale();
            return;
        }

        let solution = assignment.solution(response.nonce);
        if solution.meets(&assignment.job.target()) {
            debug!(
                "dispatcher: board {} chip {} core {} found share {:08x}",
                board, response.chip, response.core, response.nonce
            );
            self.registry.lock().await[board].accepted_count += 1;
            if !self.solution_sender.send(solution) {
                warn!("dispatcher: no session to submit share to, dropping");
            }
        } else {
            debug!(
                "dispatcher: board {} returned bad nonce {:08x}",
                board, response.nonce
            );
            self.registry.lock().await[board].hardware_error_count += 1;
            self.stats.account_hardware_error();
        }
    }

    /// Collect candidate nonces from one mining board
    async fn poll_nonces(&mut self, board: usize) {
        let result = self
            .link
            .transact_sequence(board, command::nonce(), Command::Nonce, link::NONCE_TIMEOUT)
            .await;
        match result {
            Ok(frames) => {
                self.registry.lock().await[board].note_link_success();
                for frame in frames {
                    match NonceResponse::parse(board, &frame) {
                        Ok(Some(response)) => self.process_nonce(board, response).await,
                        Ok(None) => {}
                        Err(e) => warn!("dispatcher: board {} bad nonce frame: {}", board, e),
                    }
                }
            }
            Err(e) => self.handle_link_error(board, &e).await,
        }
    }

    /// Refresh the temperature readings of all responsive boards
    async fn poll_status(&mut self) {
        let present: Vec<usize> = {
            self.registry
                .lock()
                .await
                .iter()
                .filter(|board| board.is_present())
                .map(|board| board.index)
                .collect()
        };
        for board in present {
            let result = self
                .link
                .transact(
                    board,
                    command::status(),
                    Command::Status,
                    link::STATUS_TIMEOUT,
                )
                .await
                .and_then(|frame| StatusResponse::parse(board, &frame));
            match result {
                Ok(status) => {
                    let mut boards = self.registry.lock().await;
                    boards[board].temp_inlet = Some(status.temp_inlet);
                    boards[board].temp_outlet = Some(status.temp_outlet);
                    boards[board].note_link_success();
                }
                Err(e) => self.handle_link_error(board, &e).await,
            }
        }
    }

    /// One full pass over all board slots
    async fn pass(&mut self) {
        let states: Vec<(usize, BoardState)> = {
            self.registry
                .lock()
                .await
                .iter()
                .map(|board| (board.index, board.state))
                .collect()
        };

        // slot maintenance runs even while mining is disabled
        for (board, state) in states.iter().cloned() {
            match state {
                BoardState::Absent => self.probe_board(board).await,
                BoardState::Initializing => self.configure_board(board).await,
                BoardState::Error => self.recover_board(board).await,
                _ => {}
            }
        }

        if self.mining_enabled.load(Ordering::SeqCst) {
            if let Some(current) = self.job_receiver.current() {
                let changed = self
                    .assembler
                    .as_ref()
                    .map(|assembler| !Arc::ptr_eq(assembler.job(), &current))
                    .unwrap_or(true);
                if changed {
                    info!("dispatcher: switching to job {}", current.id);
                    self.assembler = Some(job::Assembler::new(current.clone()));
                    self.assignments.clear();
                }

                let states: Vec<(usize, BoardState, bool)> = {
                    self.registry
                        .lock()
                        .await
                        .iter()
                        .map(|board| (board.index, board.state, board.has_job(&current.id)))
                        .collect()
                };
                for (board, state, has_job) in states {
                    match state {
                        BoardState::Ready => self.deliver_work(board).await,
                        BoardState::Mining if !has_job => self.deliver_work(board).await,
                        BoardState::Mining => self.poll_nonces(board).await,
                        _ => {}
                    }
                }
            }
        }

        if self.last_status_poll.elapsed() >= STATUS_POLL_INTERVAL {
            self.poll_status().await;
            self.last_status_poll = Instant::now();
        }
    }

    /// Dispatcher task; never spins, every pass ends in a bounded sleep
    pub async fn run(mut self, mut halt: sync::Receiver) {
        info!("dispatcher: running");
        loop {
            self.pass().await;
            tokio::select! {
                _ = halt.wait_for_halt() => {
                    info!("dispatcher: halted");
                    return;
                }
                _ = sleep(DISPATCH_TICK) => {}
            }
        }
    }
}
