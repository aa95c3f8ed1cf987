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

//! This module is responsible for reading fan feedback and setting fan PWM
//! through the platform's hwmon interface.

pub mod pid;

use crate::error::{ErrorKind, Result};

use std::fs;
use std::path::PathBuf;

/// Lowest duty the regulator may settle at; below this the airflow is not
/// worth the bearing wear
pub const FAN_MIN_PWM: usize = 10;

/// RPM reading under which a powered fan is considered faulty
pub const FAN_FAULT_RPM: usize = 100;

/// Structure representing PWM duty of a fan in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speed(usize);

impl Speed {
    pub const FULL_SPEED: Self = Self(100);
    pub const STOPPED: Self = Self(0);

    pub fn new(speed: usize) -> Self {
        assert!(speed <= 100);

        Speed(speed)
    }

    #[inline]
    pub fn to_percent(&self) -> usize {
        self.0
    }

    /// hwmon pwm files take 0..=255
    fn to_pwm_raw(&self) -> usize {
        self.0 * 255 / 100
    }
}

/// Speed of fans read from the tachometer inputs
#[derive(Debug, Clone, Default)]
pub struct Feedback {
    pub rpm: Vec<usize>,
}

impl Feedback {
    pub fn num_fans_running(&self) -> usize {
        self.rpm.iter().filter(|rpm| **rpm > 0).count()
    }

    /// Indexes of fans that should spin but do not reach `FAN_FAULT_RPM`
    pub fn faulty_fans(&self, duty: Speed) -> Vec<usize> {
        if duty.to_percent() <= FAN_MIN_PWM {
            return Vec::new();
        }
        self.rpm
            .iter()
            .enumerate()
            .filter(|(_, rpm)| **rpm < FAN_FAULT_RPM)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Fan controller backed by one hwmon directory with `pwmN` and
/// `fanN_input` attributes
pub struct Control {
    hwmon_path: PathBuf,
    fan_count: usize,
}

impl Control {
    pub fn new(hwmon_path: impl Into<PathBuf>, fan_count: usize) -> Self {
        Self {
            hwmon_path: hwmon_path.into(),
            fan_count,
        }
    }

    #[inline]
    pub fn fan_count(&self) -> usize {
        self.fan_count
    }

    /// Set PWM for all fans in percent (0 stops the fans, 100 is full power)
    pub fn set_speed(&self, speed: Speed) -> Result<()> {
        for fan in 1..=self.fan_count {
            let path = self.hwmon_path.join(format!("pwm{}", fan));
            fs::write(&path, format!("{}\n", speed.to_pwm_raw())).map_err(|e| {
                ErrorKind::Fan(format!("cannot write {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }

    /// Read tachometer inputs and convert them to RPM. A missing or
    /// unreadable attribute reads as 0 RPM so a wedged sensor shows up as a
    /// fan fault rather than being silently skipped.
    pub fn read_feedback(&self) -> Feedback {
        let rpm = (1..=self.fan_count)
            .map(|fan| {
                let path = self.hwmon_path.join(format!("fan{}_input", fan));
                fs::read_to_string(&path)
                    .ok()
                    .and_then(|content| content.trim().parse::<usize>().ok())
                    .unwrap_or(0)
            })
            .collect();
        Feedback { rpm }
    }
}
