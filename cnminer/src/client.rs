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

//! This module contains common functionality related to mining protocol
//! clients; the actual Stratum V1 session lives in [`stratum_v1`].

pub mod stratum_v1;

pub use stratum_v1::{ConnectionDetails, StratumClient};

/// Why a pool session terminated; drives the supervisor's reconnect and
/// failover decisions
#[derive(Debug)]
pub enum SessionEnd {
    /// Transport failure or pool side close; retry the same endpoint after
    /// a backoff
    Disconnected(String),
    /// The pool violated the dialect (bad JSON, oversize line, missing
    /// response); the session is closed and retried
    Protocol(String),
    /// `mining.authorize` was answered with a falsy result; the endpoint is
    /// marked failed for the failover logic
    AuthorizeRejected,
    /// The pool asked us to reconnect, possibly to a different endpoint
    Reconnect {
        host: Option<String>,
        port: Option<u16>,
    },
    /// Local shutdown request
    Halted,
}
