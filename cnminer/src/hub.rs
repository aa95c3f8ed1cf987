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

//! Top level supervisor: wires the pool session to the hardware backend,
//! owns reconnect backoff and endpoint failover, and broadcasts shutdown.

use cn_logging::macros::*;

use crate::client::{ConnectionDetails, SessionEnd, StratumClient};
use crate::hal;
use crate::stats;
use crate::sync;
use crate::work;

use cnminer_config::ClientDescriptor;

use tokio::time::sleep;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Delay between reconnect attempts to the same endpoint
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// How many consecutive failures an endpoint gets before failover
pub const ENDPOINT_RETRY_BUDGET: usize = 3;

/// Cadence of the summary status line
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Supervisor owning the pool endpoint list and shared state
pub struct Core {
    descriptors: Vec<ClientDescriptor>,
    stats: Arc<stats::Mining>,
    halt_sender: sync::Sender,
    halt_receiver: sync::Receiver,
}

impl Core {
    pub fn new(descriptors: Vec<ClientDescriptor>) -> Self {
        assert!(!descriptors.is_empty(), "no pool endpoints configured");
        let (halt_sender, halt_receiver) = sync::make_pair();
        Self {
            descriptors,
            stats: Arc::new(stats::Mining::new()),
            halt_sender,
            halt_receiver,
        }
    }

    #[inline]
    pub fn stats(&self) -> Arc<stats::Mining> {
        self.stats.clone()
    }

    /// Handle used to request shutdown (e.g. from a ctrl-c handler)
    #[inline]
    pub fn halt_sender(&self) -> sync::Sender {
        self.halt_sender.clone()
    }

    async fn status_task(stats: Arc<stats::Mining>) {
        loop {
            sleep(STATUS_INTERVAL).await;
            info!(
                "status: {} (uptime {}s)",
                stats.snapshot(),
                stats.uptime().as_secs()
            );
        }
    }

    /// Run the miner until halt is requested. The backend task and the
    /// status reporter are spawned; the pool session loop runs here.
    pub async fn run<B: hal::Backend>(self, backend: Arc<B>) {
        let (job_sender, job_receiver) = work::job_channel();
        let (solution_sender, mut solution_receiver) = work::solution_channel();

        info!("hub: starting backend {}", backend.name());
        tokio::spawn(backend.run(
            job_receiver,
            solution_sender,
            self.halt_receiver.clone(),
        ));
        self.halt_receiver.spawn(Self::status_task(self.stats.clone()));

        let mut halt = self.halt_receiver.clone();
        let mut endpoint = 0usize;
        let mut retries_left = ENDPOINT_RETRY_BUDGET;
        let mut failed_endpoints: HashSet<usize> = HashSet::new();
        let mut descriptor = self.descriptors[endpoint].clone();

        loop {
            if halt.should_halt() {
                break;
            }

            let client = StratumClient::new(
                ConnectionDetails::from_descriptor(&descriptor),
                job_sender.clone(),
                self.stats.clone(),
            );
            let end = client.run_session(&mut solution_receiver, &mut halt).await;

            match end {
                SessionEnd::Halted => break,
                SessionEnd::Reconnect { host, port } => {
                    // follow the redirect; a missing host means "same endpoint"
                    if let Some(host) = host {
                        let port = port.unwrap_or_else(|| descriptor.port());
                        descriptor = descriptor.with_endpoint(&host, port);
                    }
                    retries_left = ENDPOINT_RETRY_BUDGET;
                }
                SessionEnd::AuthorizeRejected => {
                    failed_endpoints.insert(endpoint);
                    let exhausted = failed_endpoints.len() >= self.descriptors.len();
                    endpoint = self.next_endpoint(endpoint, &mut failed_endpoints);
                    descriptor = self.descriptors[endpoint].clone();
                    retries_left = ENDPOINT_RETRY_BUDGET;
                    if exhausted {
                        // every endpoint refused us; pause before probing again
                        tokio::select! {
                            _ = halt.wait_for_halt() => break,
                            _ = sleep(RECONNECT_BACKOFF) => {}
                        }
                    }
                }
                SessionEnd::Disconnected(reason) | SessionEnd::Protocol(reason) => {
                    warn!(
                        "hub: session to {} ended: {}",
                        descriptor.get_url(false, true, false),
                        reason
                    );
                    retries_left = retries_left.saturating_sub(1);
                    if retries_left == 0 {
                        endpoint = self.next_endpoint(endpoint, &mut failed_endpoints);
                        descriptor = self.descriptors[endpoint].clone();
                        retries_left = ENDPOINT_RETRY_BUDGET;
                    }
                    tokio::select! {
                        _ = halt.wait_for_halt() => break,
                        _ = sleep(RECONNECT_BACKOFF) => {}
                    }
                }
            }
        }
        info!("hub: terminated");
    }

    /// Advance round-robin to the next endpoint, skipping those marked
    /// failed. Once every endpoint has failed the marks are dropped so the
    /// whole list is probed again.
    fn next_endpoint(&self, current: usize, failed: &mut HashSet<usize>) -> usize {
        if failed.len() >= self.descriptors.len() {
            warn!("hub: all endpoints failed, retrying the whole list");
            failed.clear();
        }
        let count = self.descriptors.len();
        let mut next = (current + 1) % count;
        while failed.contains(&next) {
            next = (next + 1) % count;
        }
        if next != current {
            info!(
                "hub: failing over to {}",
                self.descriptors[next].get_url(false, true, false)
            );
        }
        next
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    struct IdleBackend;

    #[async_trait]
    impl hal::Backend for IdleBackend {
        fn name(&self) -> &'static str {
            "idle-test-backend"
        }

        async fn run(
            self: Arc<Self>,
            _job_receiver: work::JobReceiver,
            _solution_sender: work::SolutionSender,
            mut halt: sync::Receiver,
        ) {
            halt.wait_for_halt().await;
        }
    }

    fn descriptor_for(listener: &TcpListener) -> ClientDescriptor {
        let port = listener.local_addr().expect("listener addr").port();
        ClientDescriptor::parse(
            &format!("stratum+tcp://127.0.0.1:{}", port),
            "worker.1",
            None,
        )
        .expect("test descriptor")
    }

    /// One scripted pool interaction: read a request, answer `result`
    async fn answer_request(listener: &TcpListener, expected: &str, result: Value) {
        let (stream, _) = listener.accept().await.expect("accept");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let line = lines
            .next_line()
            .await
            .expect("read")
            .expect("client closed");
        let request: Value = serde_json::from_str(&line).expect("request JSON");
        assert_eq!(request["method"].as_str(), Some(expected));
        let reply = json!({"id": request["id"], "result": result, "error": null});
        writer
            .write_all(format!("{}\n", reply).as_bytes())
            .await
            .expect("write");
        // keep the socket open briefly so the client reads the reply
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    /// Authorization failure on the primary endpoint fails over to the
    /// secondary without burning the retry budget
    #[tokio::test]
    async fn test_failover_on_authorize_reject() {
        let primary = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let secondary = TcpListener::bind("127.0.0.1:0").await.expect("bind");

        let core = Core::new(vec![descriptor_for(&primary), descriptor_for(&secondary)]);
        let halt_sender = core.halt_sender();

        // primary: subscribe ok, authorize rejected
        let primary_task = tokio::spawn(async move {
            let (stream, _) = primary.accept().await.expect("accept");
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();

            let subscribe: Value =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(subscribe["method"].as_str(), Some("mining.subscribe"));
            let reply = json!({
                "id": subscribe["id"],
                "result": [[["mining.notify", "s"]], "81000000", 4],
                "error": null,
            });
            writer
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();

            let authorize: Value =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(authorize["method"].as_str(), Some("mining.authorize"));
            let reply = json!({"id": authorize["id"], "result": false, "error": null});
            writer
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        // secondary just has to see the subscribe to prove failover happened
        let secondary_task = tokio::spawn(async move {
            answer_request(
                &secondary,
                "mining.subscribe",
                json!([[["mining.notify", "s"]], "10000000", 4]),
            )
            .await;
        });

        let hub_task = tokio::spawn(core.run(Arc::new(IdleBackend)));

        primary_task.await.expect("primary pool");
        secondary_task.await.expect("secondary pool");

        halt_sender.do_stop().await;
        hub_task.await.expect("hub task");
    }
}
