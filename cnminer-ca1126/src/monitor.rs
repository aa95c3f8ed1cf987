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

//! Thermal controller: consumes board temperatures, drives the fans and
//! keeps the silicon out of its smoke-release region. The fan path is the
//! primary defense; the per board frequency governor is best effort.

use cn_logging::macros::*;

use crate::fan::{self, Speed};
use crate::link::{self, Link};
use crate::registry::{BoardState, Registry};
use crate::{check_frequency, FREQ_MIN_MHZ, FREQ_STEP_MHZ};

use crate::command::{self, Command};

use cnminer::sync;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default regulation target
pub const DEFAULT_TARGET_TEMP: f32 = 75.0;
/// Fans are pinned at 90 % from here up
pub const DEFAULT_WARNING_TEMP: f32 = 85.0;
/// Fans are pinned at 100 % from here up
pub const DEFAULT_OVERHEAT_TEMP: f32 = 95.0;
/// Emergency stop threshold
pub const DEFAULT_CUTOFF_TEMP: f32 = 100.0;

/// Mining resumes after an emergency once temp_max < target - hysteresis
const COOLING_HYSTERESIS: f32 = 10.0;
/// The frequency governor steps back up below target - hysteresis
const RAISE_HYSTERESIS: f32 = 5.0;
/// Duty applied in the warning band
const WARNING_DUTY: usize = 90;
/// Controller tick
const TICK_LENGTH: Duration = Duration::from_secs(1);

/// What method of controlling fans is configured
#[derive(Debug, Clone, PartialEq)]
pub enum FanMode {
    /// Temperature regulated duty
    Auto,
    /// Fixed duty set by the operator; the overheat and cutoff branches
    /// still override it
    Manual(Speed),
}

/// Thermal configuration with validated thresholds
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: FanMode,
    pub target_temp: f32,
    pub warning_temp: f32,
    pub overheat_temp: f32,
    pub cutoff_temp: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: FanMode::Auto,
            target_temp: DEFAULT_TARGET_TEMP,
            warning_temp: DEFAULT_WARNING_TEMP,
            overheat_temp: DEFAULT_OVERHEAT_TEMP,
            cutoff_temp: DEFAULT_CUTOFF_TEMP,
        }
    }
}

/// User visible thermal condition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    Ok,
    Warning,
    Critical,
    Emergency,
    FanFault,
}

/// Output of the decision process
#[derive(Debug, Clone, PartialEq)]
pub enum ControlDecision {
    /// Fans to 100 %, mining disabled until the cooling hysteresis is met
    Emergency,
    /// Fans to 100 %
    FullSpeed,
    /// Fixed duty (warning band or manual mode)
    FixedDuty(Speed),
    /// Let the regulator settle the duty
    UsePid { target: f32, input: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlDecisionExplained {
    pub decision: ControlDecision,
    pub reason: &'static str,
}

impl ControlDecision {
    /// Decide what to do for the aggregated `temp_max`. Factored out of the
    /// controller to facilitate testing; `cooling` is true while an
    /// emergency stop is waiting for the hysteresis condition.
    fn decide(config: &Config, cooling: bool, temp_max: Option<f32>) -> ControlDecisionExplained {
        if cooling {
            return ControlDecisionExplained {
                decision: Self::Emergency,
                reason: "cooling down after emergency",
            };
        }
        let temp = match temp_max {
            None => {
                return ControlDecisionExplained {
                    decision: Self::FullSpeed,
                    reason: "no temperature reading",
                }
            }
            Some(temp) => temp,
        };
        if temp >= config.cutoff_temp {
            return ControlDecisionExplained {
                decision: Self::Emergency,
                reason: "temperature at cutoff",
            };
        }
        if temp >= config.overheat_temp {
            return ControlDecisionExplained {
                decision: Self::FullSpeed,
                reason: "temperature above overheat",
            };
        }
        if temp >= config.warning_temp {
            return ControlDecisionExplained {
                decision: Self::FixedDuty(Speed::new(WARNING_DUTY)),
                reason: "temperature above warning",
            };
        }
        match &config.mode {
            FanMode::Manual(duty) => ControlDecisionExplained {
                decision: Self::FixedDuty(*duty),
                reason: "operator defined fan speed",
            },
            FanMode::Auto => ControlDecisionExplained {
                decision: Self::UsePid {
                    target: config.target_temp,
                    input: temp,
                },
                reason: "temperature regulation",
            },
        }
    }
}

/// Status of the thermal controller for others to observe
#[derive(Debug, Clone)]
pub struct Status {
    pub condition: Condition,
    pub temp_max: Option<f32>,
    pub fan_duty: Option<Speed>,
    pub fan_feedback: fan::Feedback,
    pub mining_enabled: bool,
    pub decision: ControlDecisionExplained,
}

/// The thermal controller task state
pub struct Monitor {
    config: Config,
    registry: Arc<Registry>,
    link: Arc<Link>,
    fan_control: fan::Control,
    pid: fan::pid::TempControl,
    /// Mining permission shared with the work dispatcher
    mining_enabled: Arc<AtomicBool>,
    cooling: bool,
    current_duty: Option<Speed>,
    last_pid_update: Instant,
    status_sender: watch::Sender<Option<Status>>,
    status_receiver: watch::Receiver<Option<Status>>,
}

impl Monitor {
    pub fn new(
        config: Config,
        registry: Arc<Registry>,
        link: Arc<Link>,
        fan_control: fan::Control,
        mining_enabled: Arc<AtomicBool>,
    ) -> Self {
        let (status_sender, status_receiver) = watch::channel(None);
        let pid = fan::pid::TempControl::new(config.target_temp as f64);
        Self {
            config,
            registry,
            link,
            fan_control,
            pid,
            mining_enabled,
            cooling: false,
            current_duty: None,
            last_pid_update: Instant::now(),
            status_sender,
            status_receiver,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Status>> {
        self.status_receiver.clone()
    }

    fn set_fan_speed(&mut self, duty: Speed) {
        if self.current_duty != Some(duty) {
            info!("monitor: setting fans to {:?}", duty);
        }
        if let Err(e) = self.fan_control.set_speed(duty) {
            error!("monitor: cannot drive fans: {}", e);
        }
        self.current_duty = Some(duty);
    }

    /// Stop feeding the boards and pin the fans until the hysteresis
    /// condition releases the machine again
    async fn engage_emergency(&mut self) {
        if self.cooling {
            return;
        }
        error!("monitor: EMERGENCY STOP, de-energizing boards");
        self.cooling = true;
        self.mining_enabled.store(false, Ordering::SeqCst);
        let mut boards = self.registry.lock().await;
        for board in boards.iter_mut() {
            if board.can_mine() {
                board.state = BoardState::Overheat;
            }
        }
    }

    /// Leave the cooling state once the machine is cold enough
    async fn maybe_resume(&mut self, temp_max: Option<f32>) {
        let temp = match temp_max {
            Some(temp) => temp,
            None => return,
        };
        if !self.cooling || temp >= self.config.target_temp - COOLING_HYSTERESIS {
            return;
        }
        info!("monitor: cooled down to {:.1} C, resuming mining", temp);
        self.cooling = false;
        self.mining_enabled.store(true, Ordering::SeqCst);
        self.pid.reset();
        let mut boards = self.registry.lock().await;
        for board in boards.iter_mut() {
            if board.state == BoardState::Overheat {
                // the board gets fresh work on the next dispatch pass
                board.state = BoardState::Ready;
                board.last_job_id = None;
            }
        }
    }

    /// Best effort per board frequency governor; runs outside of the
    /// emergency path only
    async fn adjust_frequencies(&self) {
        let mut plans: Vec<(usize, u32)> = Vec::new();
        {
            let boards = self.registry.lock().await;
            for board in boards.iter() {
                if !board.can_mine() {
                    continue;
                }
                let temp = match board.temp_max() {
                    Some(tenths) => tenths as f32 / 10.0,
                    None => continue,
                };
                if temp >= self.config.overheat_temp {
                    let lowered = board.frequency_mhz.saturating_sub(FREQ_STEP_MHZ);
                    let lowered = lowered.max(FREQ_MIN_MHZ);
                    if lowered < board.frequency_mhz {
                        plans.push((board.index, lowered));
                    }
                } else if temp <= self.config.target_temp - RAISE_HYSTERESIS
                    && board.frequency_mhz < board.configured_frequency_mhz
                {
                    let raised = (board.frequency_mhz + FREQ_STEP_MHZ)
                        .min(board.configured_frequency_mhz);
                    plans.push((board.index, raised));
                }
            }
        }

        for (index, frequency) in plans {
            if check_frequency(frequency).is_err() {
                continue;
            }
            let result = self
                .link
                .transact(
                    index,
                    command::set_frequency(frequency),
                    Command::SetFrequency,
                    link::COMMAND_TIMEOUT,
                )
                .await;
            match result {
                Ok(_) => {
                    info!("monitor: board {} frequency -> {} MHz", index, frequency);
                    self.registry.lock().await[index].frequency_mhz = frequency;
                }
                Err(e) => warn!("monitor: board {} frequency change failed: {}", index, e),
            }
        }
    }

    /// One controller step; factored out of `run` for testing
    async fn tick(&mut self) {
        let temp_max = self
            .registry
            .temp_max()
            .await
            .map(|tenths| tenths as f32 / 10.0);

        self.maybe_resume(temp_max).await;
        let decision_explained = ControlDecision::decide(&self.config, self.cooling, temp_max);
        debug!("monitor: temp_max={:?} {:?}", temp_max, decision_explained);

        match &decision_explained.decision {
            ControlDecision::Emergency => {
                self.set_fan_speed(Speed::FULL_SPEED);
                self.engage_emergency().await;
            }
            ControlDecision::FullSpeed => {
                self.set_fan_speed(Speed::FULL_SPEED);
            }
            ControlDecision::FixedDuty(duty) => {
                let duty = *duty;
                self.set_fan_speed(duty);
            }
            ControlDecision::UsePid { target, input } => {
                let (target, input) = (*target, *input);
                let dt = self.last_pid_update.elapsed().as_secs_f64();
                self.pid.set_target(target as f64);
                let duty = self.pid.update(input as f64, dt);
                self.set_fan_speed(duty);
            }
        }
        self.last_pid_update = Instant::now();

        if !self.cooling {
            self.adjust_frequencies().await;
        }

        // fan fault detection and status broadcast
        let fan_feedback = self.fan_control.read_feedback();
        let faulty = match self.current_duty {
            Some(duty) => fan_feedback.faulty_fans(duty),
            None => Vec::new(),
        };
        if !faulty.is_empty() {
            error!("monitor: fan fault on fans {:?}", faulty);
        }

        let condition = if !faulty.is_empty() {
            Condition::FanFault
        } else {
            match (&decision_explained.decision, temp_max) {
                (ControlDecision::Emergency, _) => Condition::Emergency,
                (ControlDecision::FullSpeed, _) => Condition::Critical,
                (_, Some(temp)) if temp >= self.config.warning_temp => Condition::Warning,
                _ => Condition::Ok,
            }
        };

        let status = Status {
            condition,
            temp_max,
            fan_duty: self.current_duty,
            fan_feedback,
            mining_enabled: self.mining_enabled.load(Ordering::SeqCst),
            decision: decision_explained,
        };
        let _ = self.status_sender.send(Some(status));
    }

    /// Controller task: one tick per second until halt
    pub async fn run(mut self, mut halt: sync::Receiver) {
        loop {
            self.tick().await;
            tokio::select! {
                _ = halt.wait_for_halt() => {
                    // leave the fans at full power; the machine may still be hot
                    self.set_fan_speed(Speed::FULL_SPEED);
                    return;
                }
                _ = sleep(TICK_LENGTH) => {}
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::test_link;

    fn auto_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_decide_boundaries() {
        let config = auto_config();

        // exactly at cutoff engages the emergency stop
        let decision = ControlDecision::decide(&config, false, Some(DEFAULT_CUTOFF_TEMP));
        assert_eq!(decision.decision, ControlDecision::Emergency);

        // exactly at overheat pins the fans to 100 %
        let decision = ControlDecision::decide(&config, false, Some(DEFAULT_OVERHEAT_TEMP));
        assert_eq!(decision.decision, ControlDecision::FullSpeed);
        // just below stays in the warning band
        let decision =
            ControlDecision::decide(&config, false, Some(DEFAULT_OVERHEAT_TEMP - 0.1));
        assert_eq!(
            decision.decision,
            ControlDecision::FixedDuty(Speed::new(90))
        );

        // exactly at warning
        let decision = ControlDecision::decide(&config, false, Some(DEFAULT_WARNING_TEMP));
        assert_eq!(
            decision.decision,
            ControlDecision::FixedDuty(Speed::new(90))
        );

        // normal band regulates
        let decision = ControlDecision::decide(&config, false, Some(75.0));
        assert_eq!(
            decision.decision,
            ControlDecision::UsePid {
                target: DEFAULT_TARGET_TEMP,
                input: 75.0
            }
        );

        // without a reading the fans are pinned
        let decision = ControlDecision::decide(&config, false, None);
        assert_eq!(decision.decision, ControlDecision::FullSpeed);

        // the cooling state overrides everything
        let decision = ControlDecision::decide(&config, true, Some(20.0));
        assert_eq!(decision.decision, ControlDecision::Emergency);
    }

    #[test]
    fn test_decide_manual_mode_is_overridden_when_hot() {
        let mut config = auto_config();
        config.mode = FanMode::Manual(Speed::new(30));

        let decision = ControlDecision::decide(&config, false, Some(60.0));
        assert_eq!(
            decision.decision,
            ControlDecision::FixedDuty(Speed::new(30))
        );

        // manual mode does not disable the safety branches
        let decision = ControlDecision::decide(&config, false, Some(DEFAULT_OVERHEAT_TEMP));
        assert_eq!(decision.decision, ControlDecision::FullSpeed);
        let decision = ControlDecision::decide(&config, false, Some(DEFAULT_CUTOFF_TEMP + 1.0));
        assert_eq!(decision.decision, ControlDecision::Emergency);
    }

    fn test_monitor() -> (Monitor, Arc<Registry>, Arc<AtomicBool>, tempfile::TempDir) {
        let (_state, transport, selector) = test_link(1);
        let link = Arc::new(Link::new(transport, selector));
        let registry = Arc::new(Registry::new(1));
        let mining_enabled = Arc::new(AtomicBool::new(true));

        let dir = tempfile::tempdir().expect("tempdir");
        let fan_control = fan::Control::new(dir.path(), 1);
        std::fs::write(dir.path().join("fan1_input"), "4000\n").expect("tach file");

        let monitor = Monitor::new(
            Config::default(),
            registry.clone(),
            link,
            fan_control,
            mining_enabled.clone(),
        );
        (monitor, registry, mining_enabled, dir)
    }

    async fn set_board_temp(registry: &Registry, tenths: i32) {
        let mut boards = registry.lock().await;
        if boards[0].state == BoardState::Absent {
            boards[0].state = BoardState::Mining;
        }
        boards[0].temp_inlet = Some(tenths);
        boards[0].temp_outlet = Some(tenths - 20);
    }

    #[tokio::test]
    async fn test_emergency_stop_and_resume() {
        let (mut monitor, registry, mining_enabled, dir) = test_monitor();

        // hot board trips the cutoff exactly at the threshold
        set_board_temp(&registry, 1000).await;
        monitor.tick().await;

        assert!(!mining_enabled.load(Ordering::SeqCst));
        assert_eq!(registry.lock().await[0].state, BoardState::Overheat);
        let pwm = std::fs::read_to_string(dir.path().join("pwm1")).expect("pwm file");
        assert_eq!(pwm.trim(), "255");

        // still too warm: target - 10 is the resume bound
        set_board_temp(&registry, 660).await;
        monitor.tick().await;
        assert!(!mining_enabled.load(Ordering::SeqCst));
        assert_eq!(registry.lock().await[0].state, BoardState::Overheat);

        // cooled down below the hysteresis bound
        set_board_temp(&registry, 640).await;
        monitor.tick().await;
        assert!(mining_enabled.load(Ordering::SeqCst));
        assert_eq!(registry.lock().await[0].state, BoardState::Ready);
    }

    #[tokio::test]
    async fn test_pid_engages_in_normal_band() {
        let (mut monitor, registry, _mining_enabled, dir) = test_monitor();

        // on target; scenario: duty smooths toward >= 50 %
        set_board_temp(&registry, 750).await;
        for _ in 0..5 {
            monitor.tick().await;
        }
        let pwm: usize = std::fs::read_to_string(dir.path().join("pwm1"))
            .expect("pwm file")
            .trim()
            .parse()
            .expect("pwm value");
        let percent = pwm * 100 / 255;
        assert!(percent >= 50, "duty {}% must stay at or above base", percent);
        assert!(percent < 100);
    }

    #[tokio::test]
    async fn test_fan_fault_condition() {
        let (mut monitor, registry, _mining_enabled, dir) = test_monitor();
        set_board_temp(&registry, 750).await;
        // tach reads zero while the duty is well above the minimum
        std::fs::write(dir.path().join("fan1_input"), "0\n").expect("tach file");

        monitor.tick().await;
        let status = monitor
            .subscribe()
            .borrow()
            .clone()
            .expect("status broadcast");
        assert_eq!(status.condition, Condition::FanFault);
    }
}
