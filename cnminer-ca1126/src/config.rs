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

//! This module handles CA1126 configuration and configuration file parsing.
//! Values loaded from storage are clamped to their allowed ranges here; the
//! core never trusts the file to be sane.

use crate::fan;
use crate::monitor;
use crate::{
    DEFAULT_FREQUENCY_MHZ, DEFAULT_VOLTAGE_MV, FREQ_MAX_MHZ, FREQ_MIN_MHZ, VOLTAGE_MAX_MV,
    VOLTAGE_MIN_MV,
};

use cnminer_config::{ClientDescriptor, PoolConfig};

use serde::Deserialize;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cnminer.toml";

/// Default character device of the hash board UART
pub const DEFAULT_UART_PATH: &str = "/dev/ttyS1";

/// Default hwmon directory of the fan controller
pub const DEFAULT_HWMON_PATH: &str = "/sys/class/hwmon/hwmon0";

/// Default number of chassis fans
pub const DEFAULT_FAN_COUNT: usize = 2;

/// Default GPIO numbers of the one-hot board select lines
pub const DEFAULT_SELECT_GPIOS: [u64; 3] = [960, 961, 962];

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct TempConfig {
    target: Option<f32>,
    warning: Option<f32>,
    overheat: Option<f32>,
    cutoff: Option<f32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct FanConfig {
    /// Fixed duty in percent; leaving it out selects automatic regulation
    speed: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default)]
    pool: Vec<PoolConfig>,
    frequency: Option<u32>,
    voltage: Option<u32>,
    temperature: Option<TempConfig>,
    fans: Option<FanConfig>,
    hash_uart: Option<String>,
    select_gpios: Option<Vec<u64>>,
    hwmon: Option<String>,
    fan_count: Option<usize>,
}

/// Configuration after validation, ready to build the backend from
#[derive(Debug, Clone)]
pub struct Resolved {
    pub descriptors: Vec<ClientDescriptor>,
    pub frequency_mhz: u32,
    pub voltage_mv: u32,
    pub monitor: monitor::Config,
    pub uart_path: String,
    pub select_gpios: Vec<u64>,
    pub hwmon_path: String,
    pub fan_count: usize,
}

impl Configuration {
    /// Parse the TOML configuration file
    pub fn parse_file(config_path: &str) -> Result<Self, String> {
        cnminer_config::parse(config_path)
    }

    /// Add a pool from the command line
    pub fn add_pool(&mut self, url: &str, user: &str, password: Option<&str>) {
        self.pool.push(PoolConfig {
            url: url.to_string(),
            user: user.to_string(),
            password: password.map(str::to_string),
        });
    }

    pub fn set_frequency(&mut self, mhz: u32) {
        self.frequency = Some(mhz);
    }

    pub fn set_voltage(&mut self, mv: u32) {
        self.voltage = Some(mv);
    }

    pub fn has_pools(&self) -> bool {
        !self.pool.is_empty()
    }

    fn resolve_monitor(&self) -> Result<monitor::Config, String> {
        let mut config = monitor::Config::default();

        if let Some(temperature) = self.temperature.as_ref() {
            if let Some(target) = temperature.target {
                config.target_temp = target;
            }
            if let Some(warning) = temperature.warning {
                config.warning_temp = warning;
            }
            if let Some(overheat) = temperature.overheat {
                config.overheat_temp = overheat;
            }
            if let Some(cutoff) = temperature.cutoff {
                config.cutoff_temp = cutoff;
            }
        }
        if !(config.target_temp < config.warning_temp
            && config.warning_temp < config.overheat_temp
            && config.overheat_temp <= config.cutoff_temp)
        {
            return Err(format!(
                "thermal thresholds out of order: target {} warning {} overheat {} cutoff {}",
                config.target_temp, config.warning_temp, config.overheat_temp, config.cutoff_temp
            ));
        }

        if let Some(fans) = self.fans.as_ref() {
            if let Some(speed) = fans.speed {
                // duty from storage is clamped, not trusted
                config.mode = monitor::FanMode::Manual(fan::Speed::new(speed.min(100)));
            }
        }
        Ok(config)
    }

    /// Validate and clamp everything the file delivered
    pub fn resolve(self) -> Result<Resolved, String> {
        if self.pool.is_empty() {
            return Err("no pools configured".to_string());
        }
        let mut descriptors = Vec::with_capacity(self.pool.len());
        for pool in &self.pool {
            let descriptor =
                ClientDescriptor::parse(&pool.url, &pool.user, pool.password.as_deref())
                    .map_err(|e| format!("pool {}: {}", pool.url, e))?;
            descriptors.push(descriptor);
        }

        let monitor = self.resolve_monitor()?;

        Ok(Resolved {
            descriptors,
            frequency_mhz: self
                .frequency
                .unwrap_or(DEFAULT_FREQUENCY_MHZ)
                .max(FREQ_MIN_MHZ)
                .min(FREQ_MAX_MHZ),
            voltage_mv: self
                .voltage
                .unwrap_or(DEFAULT_VOLTAGE_MV)
                .max(VOLTAGE_MIN_MV)
                .min(VOLTAGE_MAX_MV),
            monitor,
            uart_path: self
                .hash_uart
                .unwrap_or_else(|| DEFAULT_UART_PATH.to_string()),
            select_gpios: self
                .select_gpios
                .unwrap_or_else(|| DEFAULT_SELECT_GPIOS.to_vec()),
            hwmon_path: self.hwmon.unwrap_or_else(|| DEFAULT_HWMON_PATH.to_string()),
            fan_count: self.fan_count.unwrap_or(DEFAULT_FAN_COUNT),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_toml(content: &str) -> Configuration {
        toml::from_str(content).expect("valid configuration")
    }

    #[test]
    fn test_full_configuration() {
        let config = parse_toml(
            r#"
            frequency = 600
            voltage = 880

            [[pool]]
            url = "stratum+tcp://pool.example.com:3333"
            user = "worker.1"

            [[pool]]
            url = "stratum+tcp://backup.example.com:3333"
            user = "worker.1"
            password = "secret"

            [temperature]
            target = 70.0
            cutoff = 98.0

            [fans]
            speed = 80
            "#,
        );
        let resolved = config.resolve().expect("resolvable configuration");

        assert_eq!(resolved.descriptors.len(), 2);
        assert_eq!(resolved.frequency_mhz, 600);
        assert_eq!(resolved.voltage_mv, 880);
        assert_eq!(resolved.monitor.target_temp, 70.0);
        assert_eq!(resolved.monitor.cutoff_temp, 98.0);
        // untouched thresholds keep their defaults
        assert_eq!(
            resolved.monitor.overheat_temp,
            monitor::DEFAULT_OVERHEAT_TEMP
        );
        assert_eq!(
            resolved.monitor.mode,
            monitor::FanMode::Manual(fan::Speed::new(80))
        );
    }

    #[test]
    fn test_defaults_and_clamping() {
        let mut config = parse_toml(
            r#"
            frequency = 5000
            voltage = 100

            [[pool]]
            url = "stratum+tcp://pool.example.com:3333"
            user = "worker.1"
            "#,
        );
        config.set_voltage(100);
        let resolved = config.resolve().expect("resolvable configuration");

        // out of range set points are clamped on load
        assert_eq!(resolved.frequency_mhz, FREQ_MAX_MHZ);
        assert_eq!(resolved.voltage_mv, VOLTAGE_MIN_MV);
        assert_eq!(resolved.monitor.mode, monitor::FanMode::Auto);
        assert_eq!(resolved.uart_path, DEFAULT_UART_PATH);
        assert_eq!(resolved.fan_count, DEFAULT_FAN_COUNT);
    }

    #[test]
    fn test_rejects_nonsense() {
        let config = parse_toml("");
        assert!(config.resolve().is_err(), "no pools must not resolve");

        let config = parse_toml(
            r#"
            [[pool]]
            url = "stratum+tcp://pool.example.com:3333"
            user = "worker.1"

            [temperature]
            target = 90.0
            warning = 80.0
            "#,
        );
        assert!(
            config.resolve().is_err(),
            "unordered thresholds must not resolve"
        );

        let config = parse_toml(
            r#"
            [[pool]]
            url = "http://pool.example.com:3333"
            user = "worker.1"
            "#,
        );
        assert!(config.resolve().is_err(), "wrong scheme must not resolve");
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Configuration::default();
        assert!(!config.has_pools());
        config.add_pool("stratum+tcp://pool.example.com:3333", "worker.1", None);
        config.set_frequency(700);
        assert!(config.has_pools());

        let resolved = config.resolve().expect("resolvable configuration");
        assert_eq!(resolved.frequency_mhz, 700);
        assert_eq!(resolved.voltage_mv, DEFAULT_VOLTAGE_MV);
    }
}
