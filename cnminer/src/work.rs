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

//! Work distribution between the pool client and the mining backend: the
//! single slot current job broadcast, the assignments generated from a job
//! and the solutions flowing back for submission.

use crate::job;

use cn_bitcoin::{DHash, Target, BLOCK_HEADER_NONCE_OFFSET, BLOCK_HEADER_SIZE};

use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, watch};

use std::fmt;
use std::sync::Arc;

/// Mining work for the hardware: one fully assembled header (nonce field
/// zeroed) together with the extranonce2 it was derived from
#[derive(Debug, Clone)]
pub struct Assignment {
    pub job: Arc<job::Job>,
    pub header: [u8; BLOCK_HEADER_SIZE],
    pub extranonce2: job::ExtraNonce2,
}

impl Assignment {
    pub fn new(
        job: Arc<job::Job>,
        header: [u8; BLOCK_HEADER_SIZE],
        extranonce2: job::ExtraNonce2,
    ) -> Self {
        Self {
            job,
            header,
            extranonce2,
        }
    }

    /// Bind a nonce returned by the hardware to this assignment
    pub fn solution(&self, nonce: u32) -> Solution {
        let mut header = self.header;
        header[BLOCK_HEADER_NONCE_OFFSET..BLOCK_HEADER_NONCE_OFFSET + 4]
            .copy_from_slice(&nonce.to_le_bytes());
        Solution {
            job: self.job.clone(),
            header,
            extranonce2: self.extranonce2.clone(),
            nonce,
            hash: OnceCell::new(),
        }
    }
}

/// Candidate solution: the assignment's header with the nonce written in.
/// The double hash is evaluated lazily and cached.
#[derive(Clone)]
pub struct Solution {
    pub job: Arc<job::Job>,
    pub header: [u8; BLOCK_HEADER_SIZE],
    pub extranonce2: job::ExtraNonce2,
    pub nonce: u32,
    hash: OnceCell<DHash>,
}

impl Solution {
    /// Double hash of the submitted header
    pub fn hash(&self) -> &DHash {
        self.hash.get_or_init(|| DHash::hash(&self.header))
    }

    /// Check the solution against a target
    #[inline]
    pub fn meets(&self, target: &Target) -> bool {
        target.is_met_by(self.hash())
    }

    /// ntime the header was assembled with
    #[inline]
    pub fn time(&self) -> u32 {
        self.job.time
    }

    /// Submit formatting: all fields lower case hex
    pub fn extranonce2_hex(&self) -> String {
        self.extranonce2.to_hex()
    }

    pub fn time_hex(&self) -> String {
        format!("{:08x}", self.time())
    }

    pub fn nonce_hex(&self) -> String {
        format!("{:08x}", self.nonce)
    }
}

impl fmt::Debug for Solution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} (job {}, nonce {:08x})",
            self.hash(),
            self.job.id,
            self.nonce
        )
    }
}

/// Build the single slot current job channel. The writer side displaces any
/// previous job; readers snapshot the newest one.
pub fn job_channel() -> (JobSender, JobReceiver) {
    let (sender, receiver) = watch::channel(None);
    (
        JobSender {
            inner: Arc::new(sender),
        },
        JobReceiver { inner: receiver },
    )
}

/// Writer end owned by the pool client
#[derive(Clone)]
pub struct JobSender {
    inner: Arc<watch::Sender<Option<Arc<job::Job>>>>,
}

impl JobSender {
    /// Install `job` as the current one. A clean job marks whatever it
    /// displaced as stale.
    pub fn broadcast(&self, job: Arc<job::Job>) {
        let clean = job.clean;
        let previous = self.inner.send_replace(Some(job));
        if clean {
            if let Some(previous) = previous {
                previous.mark_stale();
            }
        }
    }

    /// Drop the current job, e.g. when the session ended. The displaced job
    /// is always marked stale.
    pub fn clear(&self) {
        if let Some(previous) = self.inner.send_replace(None) {
            previous.mark_stale();
        }
    }
}

/// Reader end handed to backends; snapshots are taken without holding any
/// lock across an iteration
#[derive(Clone)]
pub struct JobReceiver {
    inner: watch::Receiver<Option<Arc<job::Job>>>,
}

impl JobReceiver {
    /// Snapshot of the current job, if any
    pub fn current(&self) -> Option<Arc<job::Job>> {
        self.inner.borrow().clone()
    }

    /// Wait until the slot content changes. Returns `false` when the sender
    /// is gone and no further jobs can arrive.
    pub async fn changed(&mut self) -> bool {
        self.inner.changed().await.is_ok()
    }
}

/// Solution queue towards the pool client. Submission has no backpressure;
/// each validated share is forwarded immediately.
pub fn solution_channel() -> (SolutionSender, SolutionReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        SolutionSender { inner: sender },
        SolutionReceiver { inner: receiver },
    )
}

#[derive(Clone)]
pub struct SolutionSender {
    inner: mpsc::UnboundedSender<Solution>,
}

impl SolutionSender {
    /// Hand a validated solution over for submission; returns `false` when
    /// the receiving session is gone
    pub fn send(&self, solution: Solution) -> bool {
        self.inner.send(solution).is_ok()
    }
}

pub struct SolutionReceiver {
    inner: mpsc::UnboundedReceiver<Solution>,
}

impl SolutionReceiver {
    pub async fn receive(&mut self) -> Option<Solution> {
        self.inner.recv().await
    }

    /// Non-blocking drain used when tearing a session down
    pub fn try_receive(&mut self) -> Option<Solution> {
        self.inner.try_recv().ok()
    }
}
