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

//! One unit of mining work received from the pool and the machinery that
//! turns it into 80 byte block headers: coinbase splice, merkle root
//! reduction and extranonce2 rolling.

use crate::error::{Error, Result};
use crate::work;

use cn_bitcoin::{BlockHeader, DHash, Target};
use cn_stratum_v1::messages::Notify;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Upper bound of the assembled coinbase transaction
pub const COINBASE_BUFFER_SIZE: usize = 512;

/// Allowed range of the extranonce2 width
pub const EXTRANONCE2_SIZE_RANGE: std::ops::RangeInclusive<usize> = 1..=8;

/// Mining job as delivered by `mining.notify`, enriched with the session
/// extranonce state valid at the time of arrival. The numeric target is
/// derived from `bits` once, at construction.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub prev_hash: [u8; 32],
    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,
    pub merkle_branch: Vec<[u8; 32]>,
    pub version: u32,
    pub bits: u32,
    pub time: u32,
    pub clean: bool,
    pub extranonce1: Vec<u8>,
    pub extranonce2_size: usize,
    target: Target,
    /// Set once the job has been displaced by a clean job or the session
    /// ended; stale jobs must not produce submits
    stale: AtomicBool,
}

impl Job {
    pub fn from_notify(
        notify: Notify,
        extranonce1: &[u8],
        extranonce2_size: usize,
    ) -> Result<Self> {
        if !EXTRANONCE2_SIZE_RANGE.contains(&extranonce2_size) {
            return Err(Error::Job(format!(
                "extranonce2 size {} out of range",
                extranonce2_size
            )));
        }
        let coinbase_len = notify.coinbase1.len()
            + extranonce1.len()
            + extranonce2_size
            + notify.coinbase2.len();
        if coinbase_len > COINBASE_BUFFER_SIZE {
            return Err(Error::Job(format!(
                "coinbase too long: {} bytes",
                coinbase_len
            )));
        }
        let target = Target::from_compact(notify.bits)?;

        Ok(Self {
            id: notify.job_id,
            prev_hash: notify.prev_hash,
            coinbase1: notify.coinbase1,
            coinbase2: notify.coinbase2,
            merkle_branch: notify.merkle_branch,
            version: notify.version,
            bits: notify.bits,
            time: notify.time,
            clean: notify.clean_jobs,
            extranonce1: extranonce1.to_vec(),
            extranonce2_size,
            target,
            stale: AtomicBool::new(false),
        })
    }

    /// Share target expanded from the job's compact bits
    #[inline]
    pub fn target(&self) -> Target {
        self.target
    }

    #[inline]
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }
}

/// Miner controlled part of the coinbase, treated as a fixed width little
/// endian counter
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraNonce2 {
    bytes: Vec<u8>,
}

impl ExtraNonce2 {
    /// Counter of `size` bytes starting at zero
    pub fn new(size: usize) -> Self {
        assert!(EXTRANONCE2_SIZE_RANGE.contains(&size));
        Self {
            bytes: vec![0u8; size],
        }
    }

    /// Increment by one with wrap around at the fixed width
    pub fn increment(&mut self) {
        for byte in self.bytes.iter_mut() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|byte| *byte == 0)
    }
}

/// Builds block headers for one job, rolling the extranonce2 counter with
/// every assignment it hands out.
#[derive(Debug)]
pub struct Assembler {
    job: Arc<Job>,
    extranonce2: ExtraNonce2,
}

impl Assembler {
    pub fn new(job: Arc<Job>) -> Self {
        let extranonce2 = ExtraNonce2::new(job.extranonce2_size);
        Self { job, extranonce2 }
    }

    #[inline]
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    /// Splice the coinbase: coinbase1 ‖ extranonce1 ‖ extranonce2 ‖ coinbase2
    fn coinbase(&self) -> Vec<u8> {
        let job = &self.job;
        let mut coinbase = Vec::with_capacity(COINBASE_BUFFER_SIZE);
        coinbase.extend_from_slice(&job.coinbase1);
        coinbase.extend_from_slice(&job.extranonce1);
        coinbase.extend_from_slice(self.extranonce2.as_bytes());
        coinbase.extend_from_slice(&job.coinbase2);
        coinbase
    }

    /// Reduce the coinbase hash through the merkle branch
    fn merkle_root(&self, coinbase: &[u8]) -> [u8; 32] {
        let mut current = DHash::hash(coinbase).into_inner();
        let mut buffer = [0u8; 64];
        for branch in self.job.merkle_branch.iter() {
            buffer[..32].copy_from_slice(&current);
            buffer[32..].copy_from_slice(branch);
            current = DHash::hash(&buffer).into_inner();
        }
        current
    }

    /// Compose the header for the current extranonce2 value and advance the
    /// counter for the next call
    pub fn next_work(&mut self) -> work::Assignment {
        let job = &self.job;
        let header = BlockHeader {
            version: job.version,
            previous_hash: job.prev_hash,
            merkle_root: self.merkle_root(&self.coinbase()),
            time: job.time,
            bits: job.bits,
            nonce: 0,
        };
        let assignment = work::Assignment::new(
            self.job.clone(),
            header.into_bytes(),
            self.extranonce2.clone(),
        );
        self.extranonce2.increment();
        assignment
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_notify() -> Notify {
        Notify {
            job_id: "j1".to_string(),
            prev_hash: [0u8; 32],
            coinbase1: vec![0x01, 0x00, 0x00, 0x00],
            coinbase2: vec![0x00],
            merkle_branch: vec![],
            version: 0x20000000,
            bits: 0x1d00ffff,
            time: 0x5f5e1000,
            clean_jobs: true,
        }
    }

    fn test_job() -> Arc<Job> {
        Arc::new(
            Job::from_notify(test_notify(), &[0x81, 0x00, 0x00, 0x00], 4)
                .expect("valid test job"),
        )
    }

    #[test]
    fn test_job_target_from_bits() {
        let job = test_job();
        assert_eq!(job.target(), Target::difficulty_1());
        // the most significant non-zero target byte
        assert_eq!(job.target().into_bytes()[4], 0xff);
    }

    #[test]
    fn test_job_rejects_bad_shape() {
        let mut notify = test_notify();
        notify.coinbase1 = vec![0u8; 600];
        assert!(Job::from_notify(notify, &[0x81, 0x00, 0x00, 0x00], 4).is_err());

        assert!(Job::from_notify(test_notify(), &[], 0).is_err());
        assert!(Job::from_notify(test_notify(), &[], 9).is_err());
    }

    #[test]
    fn test_header_merkle_root_is_coinbase_hash() {
        // with an empty branch the merkle root is the double hash of the
        // coinbase itself
        let mut assembler = Assembler::new(test_job());
        let assignment = assembler.next_work();

        let coinbase: Vec<u8> = [
            &[0x01u8, 0x00, 0x00, 0x00][..],
            &[0x81, 0x00, 0x00, 0x00][..],
            &[0x00, 0x00, 0x00, 0x00][..],
            &[0x00][..],
        ]
        .concat();
        let expected_root = DHash::hash(&coinbase).into_inner();
        assert_eq!(&assignment.header[36..68], &expected_root[..]);
        assert_eq!(assignment.extranonce2.as_bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_header_layout() {
        let mut assembler = Assembler::new(test_job());
        let assignment = assembler.next_work();
        let header = assignment.header;

        assert_eq!(&header[0..4], &0x20000000u32.to_le_bytes());
        assert_eq!(&header[4..36], &[0u8; 32][..]);
        assert_eq!(&header[68..72], &0x5f5e1000u32.to_le_bytes());
        assert_eq!(&header[72..76], &0x1d00ffffu32.to_le_bytes());
        // nonce placeholder
        assert_eq!(&header[76..80], &[0u8; 4]);
    }

    #[test]
    fn test_merkle_branch_reduction() {
        let mut notify = test_notify();
        notify.merkle_branch = vec![[0x11u8; 32], [0x22u8; 32]];
        let job = Arc::new(
            Job::from_notify(notify, &[0x81, 0x00, 0x00, 0x00], 4).expect("valid job"),
        );
        let mut assembler = Assembler::new(job);
        let assignment = assembler.next_work();

        let coinbase: Vec<u8> = [
            &[0x01u8, 0x00, 0x00, 0x00][..],
            &[0x81, 0x00, 0x00, 0x00][..],
            &[0x00, 0x00, 0x00, 0x00][..],
            &[0x00][..],
        ]
        .concat();
        let mut expected = DHash::hash(&coinbase).into_inner();
        for branch in &[[0x11u8; 32], [0x22u8; 32]] {
            let mut concat = [0u8; 64];
            concat[..32].copy_from_slice(&expected);
            concat[32..].copy_from_slice(branch);
            expected = DHash::hash(&concat).into_inner();
        }
        assert_eq!(&assignment.header[36..68], &expected[..]);
    }

    #[test]
    fn test_extranonce2_rolls_between_assignments() {
        let mut assembler = Assembler::new(test_job());
        let first = assembler.next_work();
        let second = assembler.next_work();

        assert_eq!(first.extranonce2.as_bytes(), &[0, 0, 0, 0]);
        assert_eq!(second.extranonce2.as_bytes(), &[1, 0, 0, 0]);
        // different extranonce2 must produce a different merkle root
        assert_ne!(&first.header[36..68], &second.header[36..68]);
    }

    #[test]
    fn test_extranonce2_increment_wraps() {
        let mut en2 = ExtraNonce2::new(1);
        for _ in 0..256 {
            en2.increment();
        }
        assert!(en2.is_zero());

        let mut en2 = ExtraNonce2::new(2);
        for expected in 1u16..=0x0200 {
            en2.increment();
            assert_eq!(en2.as_bytes(), &expected.to_le_bytes());
        }
        // full wrap for the two byte width
        let mut en2 = ExtraNonce2::new(2);
        for _ in 0..(1usize << 16) {
            en2.increment();
        }
        assert!(en2.is_zero());
    }

    #[test]
    fn test_extranonce2_hex() {
        let mut en2 = ExtraNonce2::new(4);
        assert_eq!(en2.to_hex(), "00000000");
        en2.increment();
        assert_eq!(en2.to_hex(), "01000000");
    }

    #[test]
    fn test_stale_marking() {
        let job = test_job();
        assert!(!job.is_stale());
        job.mark_stale();
        assert!(job.is_stale());
    }
}
