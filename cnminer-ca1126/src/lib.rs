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

//! Backend for the CA1126 hash board family: the "CN" framed multi-drop
//! link, the per board state machines, work dispatch and the thermal
//! controller.

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fan;
pub mod frame;
pub mod link;
pub mod monitor;
pub mod registry;
pub mod test_utils;
pub mod transport;

use cn_logging::macros::*;

use error::{ErrorKind, Result};

use async_trait::async_trait;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Allowed chip frequency range in MHz
pub const FREQ_MIN_MHZ: u32 = 100;
pub const FREQ_MAX_MHZ: u32 = 1200;

/// Step of the thermal frequency governor
pub const FREQ_STEP_MHZ: u32 = 25;

/// Factory default chip frequency
pub const DEFAULT_FREQUENCY_MHZ: u32 = 650;

/// Allowed board voltage range in mV
pub const VOLTAGE_MIN_MV: u32 = 700;
pub const VOLTAGE_MAX_MV: u32 = 950;

/// Factory default board voltage
pub const DEFAULT_VOLTAGE_MV: u32 = 900;

/// Validate a frequency set point; the bounds themselves are accepted
pub fn check_frequency(mhz: u32) -> Result<()> {
    if mhz < FREQ_MIN_MHZ || mhz > FREQ_MAX_MHZ {
        return Err(ErrorKind::SetPoint(format!(
            "frequency {} MHz outside [{}, {}]",
            mhz, FREQ_MIN_MHZ, FREQ_MAX_MHZ
        ))
        .into());
    }
    Ok(())
}

/// Validate a voltage set point; the bounds themselves are accepted
pub fn check_voltage(mv: u32) -> Result<()> {
    if mv < VOLTAGE_MIN_MV || mv > VOLTAGE_MAX_MV {
        return Err(ErrorKind::SetPoint(format!(
            "voltage {} mV outside [{}, {}]",
            mv, VOLTAGE_MIN_MV, VOLTAGE_MAX_MV
        ))
        .into());
    }
    Ok(())
}

/// The CA1126 backend: owns the link, the board registry and the thermal
/// configuration, and runs the dispatcher plus the monitor when started by
/// the hub.
pub struct Backend {
    link: Arc<link::Link>,
    registry: Arc<registry::Registry>,
    stats: Arc<cnminer::stats::Mining>,
    mining_enabled: Arc<AtomicBool>,
    monitor_config: monitor::Config,
    hwmon_path: String,
    fan_count: usize,
}

impl Backend {
    pub fn new(
        config: config::Resolved,
        transport: Box<dyn transport::Transport>,
        selector: Box<dyn transport::BoardSelector>,
        stats: Arc<cnminer::stats::Mining>,
    ) -> Self {
        let link = Arc::new(link::Link::new(transport, selector));
        let registry = Arc::new(registry::Registry::new(link.board_count()));

        // seed the configured set points; the registry is freshly built so
        // the lock cannot be contended yet
        {
            let mut boards = registry.try_lock().expect("BUG: fresh registry is locked");
            for board in boards.iter_mut() {
                board.configured_frequency_mhz = config.frequency_mhz;
                board.frequency_mhz = config.frequency_mhz;
                board.voltage_mv = config.voltage_mv;
            }
        }

        Self {
            link,
            registry,
            stats,
            mining_enabled: Arc::new(AtomicBool::new(true)),
            monitor_config: config.monitor,
            hwmon_path: config.hwmon_path,
            fan_count: config.fan_count,
        }
    }

    #[inline]
    pub fn registry(&self) -> Arc<registry::Registry> {
        self.registry.clone()
    }

    #[inline]
    pub fn link(&self) -> Arc<link::Link> {
        self.link.clone()
    }
}

#[async_trait]
impl cnminer::hal::Backend for Backend {
    fn name(&self) -> &'static str {
        "cnminer-ca1126"
    }

    async fn run(
        self: Arc<Self>,
        job_receiver: cnminer::work::JobReceiver,
        solution_sender: cnminer::work::SolutionSender,
        halt: cnminer::sync::Receiver,
    ) {
        info!(
            "ca1126: starting with {} board slots",
            self.link.board_count()
        );

        let fan_control = fan::Control::new(&self.hwmon_path, self.fan_count);
        let monitor = monitor::Monitor::new(
            self.monitor_config.clone(),
            self.registry.clone(),
            self.link.clone(),
            fan_control,
            self.mining_enabled.clone(),
        );
        tokio::spawn(monitor.run(halt.clone()));

        let dispatcher = dispatcher::Dispatcher::new(
            self.link.clone(),
            self.registry.clone(),
            self.stats.clone(),
            self.mining_enabled.clone(),
            job_receiver,
            solution_sender,
        );
        dispatcher.run(halt).await;
        info!("ca1126: stopped");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Set points exactly at the bounds succeed, one unit beyond fails
    #[test]
    fn test_set_point_bounds() {
        assert!(check_frequency(FREQ_MIN_MHZ).is_ok());
        assert!(check_frequency(FREQ_MAX_MHZ).is_ok());
        assert!(check_frequency(FREQ_MIN_MHZ - 1).is_err());
        assert!(check_frequency(FREQ_MAX_MHZ + 1).is_err());

        assert!(check_voltage(VOLTAGE_MIN_MV).is_ok());
        assert!(check_voltage(VOLTAGE_MAX_MV).is_ok());
        assert!(check_voltage(VOLTAGE_MIN_MV - 1).is_err());
        assert!(check_voltage(VOLTAGE_MAX_MV + 1).is_err());
    }
}
