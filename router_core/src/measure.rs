//! Measurement snapshot types published by the metrology engine.

/// Maximum number of interleaved analog channels.
pub const MAX_CHANNELS: usize = 4;

/// Sign of active power flow on a current channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerDirection {
    /// Power flows toward the measured branch (import / consumption).
    Consuming,
    /// Power flows out of the measured branch (export / production).
    Supplying,
    /// Active power within the detection deadband.
    Zero,
    /// No voltage reference, or the window has not completed.
    #[default]
    Unknown,
}

/// Sign of the mean centered sample over a window. Mostly a wiring
/// diagnostic: a healthy AC channel averages out to `Balanced`, while a
/// persistent offset points at a miscalibrated midpoint or a DC leak.
/// This is DC balance, not V/I correlation; the signed correlation is
/// what `power_active` and `direction` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseSign {
    Positive,
    Negative,
    #[default]
    Balanced,
}

/// Integrity of a completed measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowQuality {
    /// All expected bursts arrived and window timing was nominal.
    #[default]
    Full,
    /// Bursts were dropped or the window wall time drifted; values are
    /// usable but less trustworthy.
    Degraded,
}

/// One completed measurement window. Published by copy so consumers never
/// observe a half-updated snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Measurements {
    /// Mains RMS voltage in volts. 0 when no voltage channel is configured.
    pub voltage_rms: f32,
    /// Mean raw ADC code on the voltage channel over the window.
    pub voltage_dc_raw: f32,
    /// RMS current in amperes, indexed by channel position.
    pub current_rms: [f32; MAX_CHANNELS],
    /// Signed active power in watts, indexed by channel position.
    /// Positive means consuming, negative means supplying.
    pub power_active: [f32; MAX_CHANNELS],
    /// Power flow direction per channel, derived from `power_active`
    /// with a small deadband.
    pub direction: [PowerDirection; MAX_CHANNELS],
    /// Mean-sample sign of the voltage channel.
    pub voltage_phase: PhaseSign,
    /// Mean-sample sign per current channel.
    pub current_phase: [PhaseSign; MAX_CHANNELS],
    /// Window integrity flag.
    pub quality: WindowQuality,
    /// Acquisition timestamp of the closing burst, in milliseconds.
    pub timestamp_ms: u64,
}

impl Measurements {
    /// Signed grid power, if a grid channel exists in `map`.
    #[must_use]
    pub fn grid_power(&self, map: &crate::channel::SensorMap) -> Option<f32> {
        map.grid.map(|i| self.power_active[i])
    }

    /// Signed solar power, if a solar channel exists in `map`.
    #[must_use]
    pub fn solar_power(&self, map: &crate::channel::SensorMap) -> Option<f32> {
        map.solar.map(|i| self.power_active[i])
    }

    /// Total routed-load power, summed over the load channels in `map`.
    #[must_use]
    pub fn load_power(&self, map: &crate::channel::SensorMap) -> Option<f32> {
        if map.loads.is_empty() {
            return None;
        }
        Some(map.loads.iter().map(|&i| self.power_active[i]).sum())
    }
}
