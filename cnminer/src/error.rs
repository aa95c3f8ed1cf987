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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Standard input/output error.
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Error in the pool wire dialect.
    #[error("stratum: {0}")]
    Stratum(#[from] cn_stratum_v1::Error),

    /// Invalid compact target delivered by the pool.
    #[error("target: {0}")]
    Target(#[from] cn_bitcoin::TargetError),

    /// Job cannot be turned into valid work.
    #[error("job: {0}")]
    Job(String),

    /// Pool client protocol state error.
    #[error("client: {0}")]
    Client(String),

    /// A bounded wait expired.
    #[error("timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
