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
    /// Line is not a well formed JSON object
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Inbound line exceeded the receive buffer
    #[error("line exceeds {0} byte limit")]
    LineTooLong(usize),

    /// Inbound line is not valid UTF-8
    #[error("line is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// A structurally required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Positional parameters do not match the expected shape
    #[error("invalid parameters: {0}")]
    BadParams(String),

    /// Hex encoded field failed to decode
    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, Error>;
