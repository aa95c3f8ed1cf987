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

//! Stratum V1 pool session: one TCP connection with the
//! subscribe/authorize handshake, the notification pump and id correlated
//! submit bookkeeping.

use cn_logging::macros::*;

use crate::client::SessionEnd;
use crate::error::{Error, Result};
use crate::job::{self, EXTRANONCE2_SIZE_RANGE};
use crate::stats;
use crate::sync;
use crate::version;
use crate::work;

use cn_stratum_v1::messages::{
    self, method, Frame, Notify, Reconnect, SetDifficulty, SetExtranonce, SubscribeResult,
};
use cn_stratum_v1::LineBuffer;

use cnminer_config::ClientDescriptor;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Timeout for establishing the TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for the subscribe/authorize responses
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
/// Size of one socket read
const RX_CHUNK_SIZE: usize = 2048;

/// Endpoint and credentials of one pool session
#[derive(Debug, Clone)]
pub struct ConnectionDetails {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ConnectionDetails {
    pub fn from_descriptor(descriptor: &ClientDescriptor) -> Self {
        Self {
            host: descriptor.host(),
            port: descriptor.port(),
            user: descriptor.user(),
            password: descriptor.password(),
        }
    }
}

/// Bookkeeping for one in-flight `mining.submit`
#[derive(Debug)]
struct PendingSubmit {
    job_id: String,
    /// Session difficulty the share was accounted at
    difficulty: f64,
}

/// Inbound half of the connection: the socket read end feeding the rolling
/// line buffer. Kept apart from `Session` so the pump can wait on it while
/// the protocol state is free to be mutated by the other select branches.
struct Rx {
    reader: OwnedReadHalf,
    line_buffer: LineBuffer,
    chunk: Vec<u8>,
}

impl Rx {
    fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader,
            line_buffer: LineBuffer::new(),
            chunk: vec![0u8; RX_CHUNK_SIZE],
        }
    }

    /// One socket read into the line buffer; `Ok(false)` on EOF
    async fn fill(&mut self) -> Result<bool> {
        let count = self.reader.read(&mut self.chunk).await?;
        if count == 0 {
            return Ok(false);
        }
        self.line_buffer.extend(&self.chunk[..count]);
        Ok(true)
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.line_buffer.next_line()?)
    }
}

/// Protocol state of one live session
struct Session {
    /// Outbound lines are totally ordered by this mutex
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Monotonically increasing request id
    request_id: u64,
    extranonce1: Vec<u8>,
    extranonce2_size: usize,
    difficulty: f64,
    subscribed: bool,
    authorized: bool,
    pending_submits: HashMap<u64, PendingSubmit>,
    last_activity: Instant,
}

impl Session {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            request_id: 0,
            extranonce1: Vec::new(),
            extranonce2_size: 0,
            difficulty: 1.0,
            subscribed: false,
            authorized: false,
            pending_submits: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    async fn send_line(&self, line: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Stratum V1 client for one endpoint. `run_session` drives a single
/// connection to its end; the supervisor owns retry and failover.
pub struct StratumClient {
    details: ConnectionDetails,
    job_sender: work::JobSender,
    stats: Arc<stats::Mining>,
}

impl StratumClient {
    pub fn new(
        details: ConnectionDetails,
        job_sender: work::JobSender,
        stats: Arc<stats::Mining>,
    ) -> Self {
        Self {
            details,
            job_sender,
            stats,
        }
    }

    /// Install a new job delivered by `mining.notify`
    fn handle_notify(&self, session: &Session, params: &serde_json::Value) {
        if !(session.subscribed && session.authorized) {
            debug!("stratum: dropping notify before authorization");
            return;
        }
        let notify = match Notify::from_params(params) {
            Ok(notify) => notify,
            Err(e) => {
                warn!("stratum: malformed notify: {}", e);
                return;
            }
        };
        let job = match job::Job::from_notify(
            notify,
            &session.extranonce1,
            session.extranonce2_size,
        ) {
            Ok(job) => Arc::new(job),
            Err(e) => {
                // the previous job stays installed
                warn!("stratum: dropping malformed job: {}", e);
                return;
            }
        };
        info!(
            "stratum: new job {} (clean={}, bits={:#010x})",
            job.id, job.clean, job.bits
        );
        self.job_sender.broadcast(job);
    }

    /// Process one inbound frame; `Some(end)` terminates the session
    async fn dispatch(&self, session: &mut Session, frame: Frame) -> Result<Option<SessionEnd>> {
        session.last_activity = Instant::now();

        if let Some(method_name) = frame.method.clone() {
            match method_name.as_str() {
                method::NOTIFY => self.handle_notify(session, &frame.params),
                method::SET_DIFFICULTY => match SetDifficulty::from_params(&frame.params) {
                    Ok(set_diff) => {
                        info!("stratum: difficulty set to {}", set_diff.difficulty);
                        session.difficulty = set_diff.difficulty;
                    }
                    Err(e) => warn!("stratum: malformed set_difficulty: {}", e),
                },
                method::SET_EXTRANONCE => match SetExtranonce::from_params(&frame.params) {
                    Ok(set_extranonce) => {
                        session.extranonce1 = set_extranonce.extranonce1;
                        session.extranonce2_size = clamp_extranonce2_size(
                            set_extranonce.extranonce2_size,
                        );
                        info!(
                            "stratum: extranonce replaced (width {})",
                            session.extranonce2_size
                        );
                    }
                    Err(e) => warn!("stratum: malformed set_extranonce: {}", e),
                },
                method::CLIENT_RECONNECT => {
                    let reconnect = Reconnect::from_params(&frame.params).unwrap_or_default();
                    info!(
                        "stratum: pool requested reconnect to {:?}:{:?}",
                        reconnect.host, reconnect.port
                    );
                    return Ok(Some(SessionEnd::Reconnect {
                        host: reconnect.host,
                        port: reconnect.port,
                    }));
                }
                method::CLIENT_GET_VERSION => {
                    if let Some(id) = frame.id {
                        session
                            .send_line(messages::version_reply(id, version::AGENT))
                            .await?;
                    }
                }
                other => debug!("stratum: ignoring method {}", other),
            }
            return Ok(None);
        }

        // response shape; correlate with an outstanding submit
        if let Some(id) = frame.id {
            if let Some(pending) = session.pending_submits.remove(&id) {
                if frame.is_success_response() {
                    self.stats.account_accepted(pending.difficulty);
                    info!(
                        "stratum: share accepted (job {}, diff {})",
                        pending.job_id, pending.difficulty
                    );
                } else {
                    self.stats.account_rejected();
                    warn!(
                        "stratum: share rejected (job {}): {}",
                        pending.job_id, frame.error
                    );
                }
                return Ok(None);
            }
        }
        debug!("stratum: unmatched response (id {:?})", frame.id);
        Ok(None)
    }

    /// Send one validated solution upstream
    async fn submit(&self, session: &mut Session, solution: work::Solution) -> Result<()> {
        if solution.job.is_stale() {
            self.stats.account_stale();
            debug!("stratum: dropping stale share for job {}", solution.job.id);
            return Ok(());
        }
        if !session.authorized {
            self.stats.account_stale();
            return Ok(());
        }

        let id = session.next_request_id();
        session.pending_submits.insert(
            id,
            PendingSubmit {
                job_id: solution.job.id.clone(),
                difficulty: session.difficulty,
            },
        );
        let line = messages::submit(
            id,
            &self.details.user,
            &solution.job.id,
            &solution.extranonce2_hex(),
            &solution.time_hex(),
            &solution.nonce_hex(),
        );
        session.send_line(line).await
    }

    /// Wait for the response correlated with `id`, dispatching everything
    /// else that arrives in the meantime
    async fn wait_response(&self, session: &mut Session, rx: &mut Rx, id: u64) -> Result<Frame> {
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        loop {
            while let Some(line) = rx.next_line()? {
                let frame = Frame::parse(&line)?;
                if !frame.is_method_call() && frame.id == Some(id) {
                    return Ok(frame);
                }
                self.dispatch(session, frame).await?;
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| Error::Timeout(format!("response to request {}", id)))?;
            match timeout(remaining, rx.fill()).await {
                Ok(Ok(true)) => continue,
                Ok(Ok(false)) => {
                    return Err(Error::Client("connection closed in handshake".to_string()))
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::Timeout(format!("response to request {}", id))),
            }
        }
    }

    /// Perform the subscribe and authorize sequence
    async fn handshake(&self, session: &mut Session, rx: &mut Rx) -> Result<Option<SessionEnd>> {
        let id = session.next_request_id();
        session
            .send_line(messages::subscribe(id, version::AGENT))
            .await?;
        let response = self.wait_response(session, rx, id).await?;
        let subscribe_result = SubscribeResult::from_result(&response.result)?;
        session.extranonce1 = subscribe_result.extranonce1;
        session.extranonce2_size = clamp_extranonce2_size(subscribe_result.extranonce2_size);
        session.subscribed = true;
        info!(
            "stratum: subscribed (extranonce1 {}, extranonce2 width {})",
            hex::encode(&session.extranonce1),
            session.extranonce2_size
        );

        let id = session.next_request_id();
        session
            .send_line(messages::authorize(
                id,
                &self.details.user,
                &self.details.password,
            ))
            .await?;
        let response = self.wait_response(session, rx, id).await?;
        if !response.is_success_response() {
            warn!("stratum: authorization rejected for {}", self.details.user);
            return Ok(Some(SessionEnd::AuthorizeRejected));
        }
        session.authorized = true;
        info!("stratum: authorized as {}", self.details.user);
        Ok(None)
    }

    /// Drive one session from connect to its end. Solutions arriving on
    /// `solution_receiver` are submitted as long as the session is healthy.
    pub async fn run_session(
        &self,
        solution_receiver: &mut work::SolutionReceiver,
        halt: &mut sync::Receiver,
    ) -> SessionEnd {
        let end = self.try_run_session(solution_receiver, halt).await;

        // teardown: no further work may reference this session's jobs
        self.job_sender.clear();
        while solution_receiver.try_receive().is_some() {
            self.stats.account_stale();
        }

        match end {
            Ok(end) => end,
            Err(Error::Io(e)) => SessionEnd::Disconnected(e.to_string()),
            Err(e) => SessionEnd::Protocol(e.to_string()),
        }
    }

    async fn try_run_session(
        &self,
        solution_receiver: &mut work::SolutionReceiver,
        halt: &mut sync::Receiver,
    ) -> Result<SessionEnd> {
        info!(
            "stratum: connecting to {}:{}",
            self.details.host, self.details.port
        );
        let stream = timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.details.host.as_str(), self.details.port)),
        )
        .await
        .map_err(|_| Error::Timeout("connect".to_string()))??;

        let (reader, writer) = stream.into_split();
        let mut rx = Rx::new(reader);
        let mut session = Session::new(writer);
        if let Some(end) = self.handshake(&mut session, &mut rx).await? {
            return Ok(end);
        }

        loop {
            while let Some(line) = rx.next_line()? {
                let frame = Frame::parse(&line)?;
                if let Some(end) = self.dispatch(&mut session, frame).await? {
                    return Ok(end);
                }
            }

            tokio::select! {
                _ = halt.wait_for_halt() => {
                    return Ok(SessionEnd::Halted);
                }
                solution = solution_receiver.receive() => {
                    match solution {
                        Some(solution) => self.submit(&mut session, solution).await?,
                        None => {
                            return Err(Error::Client(
                                "solution source disappeared".to_string(),
                            ));
                        }
                    }
                }
                read = rx.fill() => {
                    if !read? {
                        return Ok(SessionEnd::Disconnected(format!(
                            "pool closed connection ({}s since last activity)",
                            session.last_activity.elapsed().as_secs()
                        )));
                    }
                }
            }
        }
    }
}

fn clamp_extranonce2_size(size: usize) -> usize {
    size.max(*EXTRANONCE2_SIZE_RANGE.start())
        .min(*EXTRANONCE2_SIZE_RANGE.end())
}
