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

//! Process-wide logger built on top of `slog`. The drain is assembled lazily
//! on first use: terminal output, env-based filtering (`RUST_LOG` syntax via
//! `slog-envlogger`) and an async buffer in front of it.
//!
//! Intended usage is `use cn_logging::macros::*;` which brings the usual
//! `trace!()`..`error!()` macros bound to the global logger into scope.

use lazy_static::lazy_static;
use slog::Drain;

/// Number of log lines the async drain may buffer before dropping
const ASYNC_LOGGER_CHANNEL_SIZE: usize = 4096;

fn build_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let format = slog_term::CompactFormat::new(decorator).build().fuse();
    let filtered = slog_envlogger::new(format).fuse();
    let drain = slog_async::Async::new(filtered)
        .chan_size(ASYNC_LOGGER_CHANNEL_SIZE)
        .build()
        .fuse();
    slog::Logger::root(drain, slog::o!())
}

lazy_static! {
    /// Shared application logger; all logging macros in `macros` go through it
    pub static ref LOGGER: slog::Logger = build_logger();
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { ::slog::trace!(&*$crate::LOGGER, $($arg)+) };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { ::slog::debug!(&*$crate::LOGGER, $($arg)+) };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { ::slog::info!(&*$crate::LOGGER, $($arg)+) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { ::slog::warn!(&*$crate::LOGGER, $($arg)+) };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { ::slog::error!(&*$crate::LOGGER, $($arg)+) };
}

/// One-stop import for logging users
pub mod macros {
    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(test)]
mod test {
    #[test]
    fn test_logger_smoke() {
        use crate::macros::*;

        info!("logging smoke test: {}", 42);
        warn!("logging smoke test warn");
    }
}
