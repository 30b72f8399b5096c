//! Closed-loop router controller.
//!
//! Consumes one [`Measurements`] snapshot per window and steers the dimmer
//! output channel according to the active mode. All level arithmetic is
//! done on an internal f32 target so sub-percent corrections accumulate
//! across windows even though the dimmer is commanded in whole percent.

use crate::channel::SensorMap;
use crate::dimmer::{DimmerCurve, DimmerEngine};
use crate::error::RouterError;
use crate::measure::{Measurements, WindowQuality};
use crate::status::{ControlState, RouterMode, RouterStatus};
use crate::util::clamp_level;

/// Bounds on the proportional divisor. Small gains react hard, large gains
/// creep; outside this range the loop is either unstable or useless.
pub const GAIN_MIN: f32 = 10.0;
pub const GAIN_MAX: f32 = 1_000.0;

/// Control parameters, typically taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ControlSettings {
    /// Proportional divisor: each update moves the target by grid_w / gain.
    pub gain: f32,
    /// Grid power deadband in watts around the balance point.
    pub balance_threshold_w: f32,
    /// Rated power of the routed load, used by off-grid scaling.
    pub load_nominal_w: f32,
    /// Dimmer channel driven by the control loop.
    pub output_channel: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            gain: 200.0,
            balance_threshold_w: 10.0,
            load_nominal_w: 2_000.0,
            output_channel: 0,
        }
    }
}

impl From<&router_config::ControlCfg> for ControlSettings {
    fn from(c: &router_config::ControlCfg) -> Self {
        Self {
            gain: c.gain,
            balance_threshold_w: c.balance_threshold_w,
            load_nominal_w: c.load_nominal_w,
            output_channel: c.output_channel,
        }
    }
}

/// Why a mode cannot run with the given sensor set, or `None` when it can.
#[must_use]
pub fn mode_requirement(mode: RouterMode, sensors: &SensorMap) -> Option<&'static str> {
    match mode {
        RouterMode::Auto if !sensors.has_grid() => Some("auto mode requires a grid current sensor"),
        RouterMode::Eco if !sensors.has_grid() => Some("eco mode requires a grid current sensor"),
        RouterMode::OffGrid if !sensors.has_solar() => {
            Some("offgrid mode requires a solar current sensor")
        }
        _ => None,
    }
}

/// Check whether `mode` can run with the given sensor set.
#[must_use]
pub fn validate_mode(mode: RouterMode, sensors: &SensorMap) -> bool {
    mode_requirement(mode, sensors).is_none()
}

pub struct RouterController {
    dimmer: DimmerEngine,
    sensors: SensorMap,
    mode: RouterMode,
    state: ControlState,
    target_level: f32,
    manual_level: u8,
    gain: f32,
    balance_threshold_w: f32,
    load_nominal_w: f32,
    output_channel: usize,
    last_grid_w: Option<f32>,
    last_solar_w: Option<f32>,
    last_load_w: Option<f32>,
    last_valid: bool,
    last_update_ms: u64,
}

impl RouterController {
    /// Build the controller. Settings are clamped into their valid ranges
    /// rather than rejected; configuration validation happens earlier.
    #[must_use]
    pub fn new(dimmer: DimmerEngine, sensors: SensorMap, settings: ControlSettings) -> Self {
        let output_channel = settings
            .output_channel
            .min(dimmer.channel_count().saturating_sub(1));
        Self {
            dimmer,
            sensors,
            mode: RouterMode::Off,
            state: ControlState::Idle,
            target_level: 0.0,
            manual_level: 0,
            gain: settings.gain.clamp(GAIN_MIN, GAIN_MAX),
            balance_threshold_w: settings.balance_threshold_w.max(0.0),
            load_nominal_w: settings.load_nominal_w.max(1.0),
            output_channel,
            last_grid_w: None,
            last_solar_w: None,
            last_load_w: None,
            last_valid: false,
            last_update_ms: 0,
        }
    }

    /// Switch operating mode. Fails when the sensor set cannot support the
    /// requested mode; the current mode is kept in that case.
    pub fn set_mode(&mut self, mode: RouterMode) -> std::result::Result<(), RouterError> {
        if let Some(reason) = mode_requirement(mode, &self.sensors) {
            tracing::warn!(%mode, reason, "mode change rejected");
            return Err(RouterError::ModeRejected(reason));
        }
        if mode != self.mode {
            tracing::info!(from = %self.mode, to = %mode, "mode change");
        }
        self.mode = mode;
        Ok(())
    }

    #[must_use]
    pub fn mode(&self) -> RouterMode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> ControlState {
        self.state
    }

    #[must_use]
    pub fn target_level(&self) -> f32 {
        self.target_level
    }

    /// Level used by MANUAL mode, clamped to 100.
    pub fn set_manual_level(&mut self, percent: u8) {
        self.manual_level = percent.min(100);
    }

    /// Proportional gain, clamped to [10, 1000]. Non-finite values are
    /// rejected.
    pub fn set_control_gain(&mut self, gain: f32) -> std::result::Result<(), RouterError> {
        if !gain.is_finite() {
            return Err(RouterError::Config("gain must be finite".into()));
        }
        self.gain = gain.clamp(GAIN_MIN, GAIN_MAX);
        Ok(())
    }

    #[must_use]
    pub fn control_gain(&self) -> f32 {
        self.gain
    }

    /// Balance deadband in watts, clamped to non-negative.
    pub fn set_balance_threshold(&mut self, watts: f32) -> std::result::Result<(), RouterError> {
        if !watts.is_finite() {
            return Err(RouterError::Config("threshold must be finite".into()));
        }
        self.balance_threshold_w = watts.max(0.0);
        Ok(())
    }

    #[must_use]
    pub fn balance_threshold(&self) -> f32 {
        self.balance_threshold_w
    }

    /// One control step, driven by each completed measurement window.
    pub fn update(&mut self, m: &Measurements) {
        let grid = m.grid_power(&self.sensors);
        let solar = m.solar_power(&self.sensors);
        self.last_grid_w = grid;
        self.last_solar_w = solar;
        self.last_load_w = m.load_power(&self.sensors);
        self.last_valid = m.quality == WindowQuality::Full;
        self.last_update_ms = m.timestamp_ms;

        let prev = self.target_level;
        let step = match self.mode {
            RouterMode::Off => Step::Pinned(0.0),
            RouterMode::Manual => Step::Pinned(f32::from(self.manual_level)),
            RouterMode::Boost => Step::Pinned(100.0),
            RouterMode::Auto => match grid {
                None => Step::SensorLost,
                Some(g) if g.abs() <= self.balance_threshold_w => Step::Hold,
                Some(g) => Step::Loop(prev - g / self.gain),
            },
            RouterMode::Eco => match grid {
                None => Step::SensorLost,
                Some(g) if g > self.balance_threshold_w => Step::Loop(prev - g / self.gain),
                // Export or balance: eco never raises the level to chase it.
                Some(_) => Step::Hold,
            },
            RouterMode::OffGrid => match solar {
                None => Step::SensorLost,
                Some(s) => Step::Loop(s.abs() / self.load_nominal_w * 100.0),
            },
        };

        match step {
            Step::SensorLost => {
                self.state = ControlState::Error;
                self.target_level = 0.0;
                self.apply_output();
            }
            Step::Hold => {
                self.state = ControlState::Idle;
            }
            Step::Pinned(level) => {
                self.target_level = clamp_level(level);
                self.state = if self.target_level > prev {
                    ControlState::Increasing
                } else if self.target_level < prev {
                    ControlState::Decreasing
                } else {
                    ControlState::Idle
                };
                self.apply_output();
            }
            Step::Loop(unclamped) => {
                self.target_level = clamp_level(unclamped);
                self.state = if unclamped >= 100.0 {
                    ControlState::AtMaximum
                } else if unclamped <= 0.0 {
                    ControlState::AtMinimum
                } else if self.target_level > prev {
                    ControlState::Increasing
                } else if self.target_level < prev {
                    ControlState::Decreasing
                } else {
                    ControlState::Idle
                };
                self.apply_output();
            }
        }
    }

    fn apply_output(&mut self) {
        let level = self.target_level.round() as u8;
        if let Err(e) = self.dimmer.set_power(self.output_channel, level) {
            tracing::warn!(channel = self.output_channel, error = %e, "output update failed");
            self.state = ControlState::Error;
        }
    }

    /// Force everything off. Always lands in OFF mode with a zero target,
    /// even when some gates fail to disarm; failures are logged and the
    /// sweep continues. Safe to call repeatedly.
    pub fn emergency_stop(&mut self) {
        self.mode = RouterMode::Off;
        self.state = ControlState::Idle;
        self.target_level = 0.0;
        if let Err(e) = self.dimmer.all_off() {
            tracing::warn!(error = %e, "emergency stop: some gates failed to disarm");
        } else {
            tracing::info!("emergency stop: all outputs off");
        }
    }

    /// Half-cycle tick forwarded to the dimmer.
    pub fn on_zero_cross(&mut self) {
        self.dimmer.on_zero_cross();
    }

    #[must_use]
    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            mode: self.mode,
            state: self.state,
            target_level: self.target_level,
            grid_power_w: self.last_grid_w,
            solar_power_w: self.last_solar_w,
            load_power_w: self.last_load_w,
            control_gain: self.gain,
            balance_threshold_w: self.balance_threshold_w,
            mains_hz: self.dimmer.get_mains_frequency(),
            valid: self.last_valid,
            last_update_ms: self.last_update_ms,
            channels: self.dimmer.channel_states(),
        }
    }

    #[must_use]
    pub fn sensors(&self) -> &SensorMap {
        &self.sensors
    }

    pub fn dimmer(&self) -> &DimmerEngine {
        &self.dimmer
    }

    pub fn dimmer_mut(&mut self) -> &mut DimmerEngine {
        &mut self.dimmer
    }

    /// Initialize the dimmer outputs. Must run before the first update.
    pub fn begin(&mut self, curve: DimmerCurve) -> std::result::Result<(), crate::error::BeginError> {
        self.dimmer.begin(curve)
    }
}

enum Step {
    /// Open-loop level fixed by the mode.
    Pinned(f32),
    /// Closed-loop level before clamping.
    Loop(f32),
    /// Inside the deadband: leave target and report idle.
    Hold,
    /// Required sensor unavailable.
    SensorLost,
}
