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
use url::Url;

use std::fmt;

pub const SCHEME_STRATUM_V1: &str = "stratum+tcp";

/// Default worker password used when the configuration leaves it out
pub const DEFAULT_POOL_PASSWORD: &str = "x";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("missing hostname")]
    MissingHost,
    #[error("missing port")]
    MissingPort,
    #[error("empty user")]
    EmptyUser,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Protocol {
    StratumV1,
}

impl Protocol {
    pub fn parse(scheme: &str) -> Result<Self, DescriptorError> {
        if scheme == SCHEME_STRATUM_V1 {
            Ok(Self::StratumV1)
        } else {
            Err(DescriptorError::UnknownProtocol(scheme.to_string()))
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::StratumV1 => SCHEME_STRATUM_V1,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Protocol::StratumV1 => write!(f, "Stratum V1"),
        }
    }
}

/// Contains basic information about one pool endpoint the client connects to.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    protocol: Protocol,
    user: String,
    password: String,
    host: String,
    port: u16,
}

impl Descriptor {
    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[inline]
    pub fn host(&self) -> String {
        self.host.clone()
    }

    #[inline]
    pub fn user(&self) -> String {
        self.user.clone()
    }

    #[inline]
    pub fn password(&self) -> String {
        self.password.clone()
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Socket address in `host:port` form for the resolver
    #[inline]
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn get_url(&self, protocol: bool, port: bool, user: bool) -> String {
        let mut result = if protocol {
            self.protocol.scheme().to_string() + "://"
        } else {
            String::new()
        };
        if user {
            result += format!("{}@", self.user).as_str();
        }
        result += self.host.as_str();
        if port {
            result += format!(":{}", self.port).as_str();
        }

        result
    }

    #[inline]
    pub fn get_full_url(&self) -> String {
        self.get_url(true, true, true)
    }

    /// Derive a descriptor for the endpoint a `client.reconnect` notification
    /// redirects to
    pub fn with_endpoint(&self, host: &str, port: u16) -> Self {
        let mut redirected = self.clone();
        redirected.host = host.to_string();
        redirected.port = port;
        redirected
    }

    /// Create client `Descriptor` from information provided by the user.
    pub fn parse(
        url: &str,
        user: &str,
        password: Option<&str>,
    ) -> Result<Self, DescriptorError> {
        if user.is_empty() {
            return Err(DescriptorError::EmptyUser);
        }
        let url = Url::parse(url).map_err(|e| DescriptorError::Url(e.to_string()))?;

        let protocol = Protocol::parse(url.scheme())?;
        let host = url
            .host_str()
            .ok_or(DescriptorError::MissingHost)?
            .to_string();
        let port = url.port().ok_or(DescriptorError::MissingPort)?;

        Ok(Descriptor {
            protocol,
            user: user.to_string(),
            password: password.unwrap_or(DEFAULT_POOL_PASSWORD).to_string(),
            host,
            port,
        })
    }
}
