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

//! This module provides a way to
//!   * spawn tasks in "termination context"
//!   * terminate that context
//!   * wait for "termination" in normal context
//!
//! Termination context means that a task is `select`-ed against the
//! termination condition, and when that condition is signaled, select
//! returns and the task is dropped. Tasks that need cleanup wait on the
//! condition explicitly and then do whatever is necessary.

use cn_logging::macros::*;

use std::sync::Arc;
use std::time::Duration;

use core::future::Future;
use futures::future::{select, FutureExt};
use tokio::sync::watch;
use tokio::time::sleep;

/// Grace period for tasks to observe the halt condition
const HALT_SETTLE_TIME: Duration = Duration::from_secs(2);

/// Sender of the halt condition
#[derive(Clone)]
pub struct Sender {
    inner: Arc<watch::Sender<bool>>,
}

impl Sender {
    /// Broadcast the halt condition and give tasks a moment to observe it
    pub async fn do_stop(&self) {
        if self.inner.send(true).is_err() {
            warn!("halt: no receivers left to stop");
        }
        sleep(HALT_SETTLE_TIME).await;
    }
}

/// Receiver of the halt condition
#[derive(Clone)]
pub struct Receiver {
    inner: watch::Receiver<bool>,
}

impl Receiver {
    /// Wait for halt to be broadcast
    pub async fn wait_for_halt(&mut self) {
        loop {
            if *self.inner.borrow() {
                break;
            }
            if self.inner.changed().await.is_err() {
                error!("halt: sender dropped, shutting down task");
                break;
            }
        }
    }

    /// Check the condition without waiting
    pub fn should_halt(&self) -> bool {
        *self.inner.borrow()
    }

    /// Spawn a new task that is dropped when halt is received
    pub fn spawn<F>(&self, f: F)
    where
        F: Future<Output = ()> + 'static + Send,
    {
        let mut receiver = self.clone();
        tokio::spawn(async move {
            select(f.boxed(), receiver.wait_for_halt().boxed()).await;
        });
    }
}

pub fn make_pair() -> (Sender, Receiver) {
    let (tx, rx) = watch::channel(false);
    (
        Sender {
            inner: Arc::new(tx),
        },
        Receiver { inner: rx },
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_halt_broadcast() {
        let (sender, receiver) = make_pair();
        assert!(!receiver.should_halt());

        let mut waiting = receiver.clone();
        let waiter = tokio::spawn(async move { waiting.wait_for_halt().await });

        sender.do_stop().await;
        assert!(receiver.should_halt());
        waiter.await.expect("halt waiter failed");
    }

    #[tokio::test]
    async fn test_spawned_task_is_stopped() {
        let (sender, receiver) = make_pair();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        receiver.spawn(async move {
            // park forever; the task must be dropped by the halt select
            futures::future::pending::<()>().await;
            drop(done_tx);
        });

        sender.do_stop().await;
        // sender side of `done_tx` is dropped together with the task
        assert!(done_rx.await.is_err());
    }
}
