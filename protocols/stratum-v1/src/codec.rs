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

//! Line discipline of the Stratum V1 transport: a rolling receive buffer
//! consumed strictly one newline terminated line at a time.

use crate::error::{Error, Result};

/// Default bound on a single inbound line, terminator included
pub const MAX_LINE_LENGTH: usize = 4096;

/// Rolling receive buffer. Bytes are appended as they arrive from the
/// socket; complete lines are taken out with [`LineBuffer::next_line`].
/// A line that does not terminate within the limit is a protocol violation
/// and the session is expected to close.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_LENGTH)
    }

    pub fn with_limit(limit: usize) -> Self {
        assert!(limit > 0);
        Self {
            buf: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Append bytes received from the transport
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Take the first complete line out of the buffer. Returns `Ok(None)`
    /// when no full line is buffered yet. The terminating `\n` and an
    /// optional preceding `\r` are stripped.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        match self.buf.iter().position(|byte| *byte == b'\n') {
            Some(pos) if pos < self.limit => {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(String::from_utf8(line)?))
            }
            Some(_) => Err(Error::LineTooLong(self.limit)),
            None if self.buf.len() >= self.limit => Err(Error::LineTooLong(self.limit)),
            None => Ok(None),
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_line_splitting() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"{\"id\":1}\n{\"id\":2}\r\n{\"id");
        assert_eq!(buffer.next_line().unwrap(), Some("{\"id\":1}".to_string()));
        assert_eq!(buffer.next_line().unwrap(), Some("{\"id\":2}".to_string()));
        // incomplete tail stays buffered
        assert_eq!(buffer.next_line().unwrap(), None);
        buffer.extend(b"\":3}\n");
        assert_eq!(buffer.next_line().unwrap(), Some("{\"id\":3}".to_string()));
        assert_eq!(buffer.next_line().unwrap(), None);
    }

    #[test]
    fn test_empty_line() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"\n");
        assert_eq!(buffer.next_line().unwrap(), Some(String::new()));
    }

    #[test]
    fn test_line_length_boundary() {
        // limit - 1 content bytes plus the newline are accepted
        let mut buffer = LineBuffer::with_limit(16);
        buffer.extend(&[b'x'; 15]);
        buffer.extend(b"\n");
        assert_eq!(buffer.next_line().unwrap(), Some("x".repeat(15)));

        // one more content byte trips the limit
        let mut buffer = LineBuffer::with_limit(16);
        buffer.extend(&[b'x'; 16]);
        buffer.extend(b"\n");
        assert!(matches!(buffer.next_line(), Err(Error::LineTooLong(16))));

        // an unterminated flood trips the limit as well
        let mut buffer = LineBuffer::with_limit(16);
        buffer.extend(&[b'x'; 16]);
        assert!(matches!(buffer.next_line(), Err(Error::LineTooLong(16))));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buffer = LineBuffer::new();
        buffer.extend(&[0xff, 0xfe, b'\n']);
        assert!(matches!(buffer.next_line(), Err(Error::Utf8(_))));
    }
}
