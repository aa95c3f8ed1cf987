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

//! Share accounting shared between the pool client and the backend.

use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

/// Counters resolved by pool responses and backend validation
#[derive(Debug, Default, Clone)]
struct MiningInner {
    /// Shares the pool acknowledged with a truthy result
    accepted: u64,
    /// Shares the pool refused or that failed on the wire
    rejected: u64,
    /// Shares dropped because their job was superseded or the session died
    stale: u64,
    /// Nonces that did not hash below the job target
    hardware_errors: u64,
    /// Sum of session difficulty over accepted shares
    total_difficulty: f64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub stale: u64,
    pub hardware_errors: u64,
    pub total_difficulty: f64,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} rejected={} stale={} hw_errors={} total_diff={:.1}",
            self.accepted, self.rejected, self.stale, self.hardware_errors, self.total_difficulty
        )
    }
}

/// Mining statistics record guarded by a single mutex
#[derive(Debug)]
pub struct Mining {
    inner: Mutex<MiningInner>,
    /// When the record was created; used to express uptime in status lines
    started: Instant,
}

impl Mining {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MiningInner::default()),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MiningInner> {
        self.inner.lock().expect("BUG: mining stats lock poisoned")
    }

    /// A submit was answered with a truthy result; `difficulty` is the
    /// session difficulty the share was mined at
    pub fn account_accepted(&self, difficulty: f64) {
        let mut inner = self.lock();
        inner.accepted += 1;
        inner.total_difficulty += difficulty;
    }

    pub fn account_rejected(&self) {
        self.lock().rejected += 1;
    }

    pub fn account_stale(&self) {
        self.lock().stale += 1;
    }

    pub fn account_hardware_error(&self) {
        self.lock().hardware_errors += 1;
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            accepted: inner.accepted,
            rejected: inner.rejected,
            stale: inner.stale,
            hardware_errors: inner.hardware_errors,
            total_difficulty: inner.total_difficulty,
        }
    }
}

impl Default for Mining {
    fn default() -> Self {
        Self::new()
    }
}
