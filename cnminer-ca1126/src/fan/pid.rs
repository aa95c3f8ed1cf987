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

//! Fan duty regulator: a PI shaped rule around a 50 % base duty with a
//! small derivative term and asymmetric output smoothing (spin up fast,
//! spin down slowly).

use super::{Speed, FAN_MIN_PWM};

/// Proportional gain per degree of error
const KP: f64 = 2.0;
/// Integral gain per degree second
const KI: f64 = 0.1;
/// Derivative gain per degree per second
const KD: f64 = 0.5;
/// Duty the rule is centered at when the temperature sits on target
const BASE_OUTPUT: f64 = 50.0;
/// Symmetric bound of the integral accumulator
const ACCUMULATOR_LIMIT: f64 = 100.0;
/// Smallest usable update interval; guards the derivative division
const MIN_DT: f64 = 1e-3;

pub struct TempControl {
    target: f64,
    accumulator: f64,
    prev_error: f64,
    /// Smoothed duty of the previous update
    last_output: f64,
    /// The first update has no history for the derivative term
    primed: bool,
}

impl TempControl {
    /// Regulator starts with the fans at full power; the first updates ramp
    /// the duty down once the temperature is known to be sane
    pub fn new(target: f64) -> Self {
        Self {
            target,
            accumulator: 0.0,
            prev_error: 0.0,
            last_output: Speed::FULL_SPEED.to_percent() as f64,
            primed: false,
        }
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    #[inline]
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Drop accumulated history, e.g. after leaving an emergency state
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.prev_error = 0.0;
        self.primed = false;
    }

    /// One regulation step: `temperature` in degrees celsius, `dt` in
    /// seconds since the previous update
    pub fn update(&mut self, temperature: f64, dt: f64) -> Speed {
        let dt = dt.max(MIN_DT);
        let error = temperature - self.target;

        self.accumulator =
            (self.accumulator + error * dt).clamp(-ACCUMULATOR_LIMIT, ACCUMULATOR_LIMIT);
        let derivative = if self.primed {
            (error - self.prev_error) / dt
        } else {
            self.primed = true;
            0.0
        };
        self.prev_error = error;

        let output = BASE_OUTPUT + KP * error + KI * self.accumulator + KD * derivative;
        let output = output.clamp(FAN_MIN_PWM as f64, 100.0);

        // spin up fast, spin down slowly
        let smoothed = if output > self.last_output {
            (self.last_output + 3.0 * output) / 4.0
        } else {
            (3.0 * self.last_output + output) / 4.0
        };
        self.last_output = smoothed;

        Speed::new(smoothed.round() as usize)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_on_target_settles_at_base_duty() {
        let mut control = TempControl::new(75.0);
        let mut duty = Speed::FULL_SPEED;
        for _ in 0..100 {
            duty = control.update(75.0, 1.0);
            // duty never dips under the base while on target
            assert!(duty.to_percent() >= BASE_OUTPUT as usize);
        }
        assert_eq!(duty.to_percent(), BASE_OUTPUT as usize);
    }

    #[test]
    fn test_first_step_smooths_from_full_speed() {
        let mut control = TempControl::new(75.0);
        let duty = control.update(75.0, 1.0);
        // (100 * 3 + 50) / 4 = 87.5
        assert_eq!(duty.to_percent(), 88);
    }

    #[test]
    fn test_hot_board_raises_duty_quickly() {
        let mut control = TempControl::new(75.0);
        // settle on target first
        for _ in 0..100 {
            control.update(75.0, 1.0);
        }
        assert_relative_eq!(control.last_output, BASE_OUTPUT, epsilon = 0.01);

        // a 20 degree excursion must push the output up fast
        let duty = control.update(95.0, 1.0);
        assert!(duty.to_percent() >= 85);
    }

    #[test]
    fn test_asymmetric_smoothing() {
        let mut control = TempControl::new(75.0);
        for _ in 0..100 {
            control.update(75.0, 1.0);
        }

        // one hot second spikes the duty up
        let raised = control.update(95.0, 1.0).to_percent();
        // back on target the decay is visibly slower than the attack
        let lowered = control.update(75.0, 1.0).to_percent();
        let attack = raised as i64 - 50;
        let decay = raised as i64 - lowered as i64;
        assert!(attack > 0);
        assert!(decay < attack);
    }

    #[test]
    fn test_accumulator_is_clamped() {
        let mut control = TempControl::new(75.0);
        // a long stretch way below target drives the accumulator to the
        // negative clamp, not to minus infinity
        for _ in 0..10_000 {
            control.update(35.0, 1.0);
        }
        assert_relative_eq!(control.accumulator, -ACCUMULATOR_LIMIT);

        // recovery is therefore bounded as well
        for _ in 0..200 {
            control.update(95.0, 1.0);
        }
        assert!(control.last_output > 90.0);
    }

    #[test]
    fn test_output_clamped_to_valid_duty() {
        let mut control = TempControl::new(75.0);
        for _ in 0..50 {
            let duty = control.update(20.0, 1.0);
            assert!(duty.to_percent() >= FAN_MIN_PWM);
            assert!(duty.to_percent() <= 100);
        }
        for _ in 0..50 {
            let duty = control.update(120.0, 1.0);
            assert!(duty.to_percent() <= 100);
        }
    }
}
