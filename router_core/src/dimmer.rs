//! Phase-cut dimmer engine.
//!
//! Each output channel drives one TRIAC gate. A power level in percent is
//! translated to a firing delay after the mains zero-crossing according to
//! the active curve; the delay is recomputed every half-cycle from the live
//! half-period so the output tracks mains frequency drift.

use std::sync::Arc;
use std::time::Instant;

use router_traits::{Clock, TriacGate};

use crate::error::{map_hw_error, BeginError, RouterError};
use crate::util::clamp_level;
use crate::zerocross::ZeroCrossClock;

/// Upper bound on smooth-transition duration, milliseconds.
pub const MAX_RAMP_MS: u32 = 5_000;
/// Default smooth-transition duration, milliseconds.
pub const DEFAULT_RAMP_MS: u32 = 500;

/// Leave at least this much conduction time before the next zero-crossing,
/// so the TRIAC sees enough holding current to latch.
const MIN_CONDUCTION_US: u32 = 100;

/// Mapping from power percent to firing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DimmerCurve {
    /// Delay proportional to (100 - percent). Cheap, but delivered power is
    /// not proportional to the setting.
    Linear,
    /// Inverts the phase-cut power integral so percent matches delivered RMS
    /// power into a resistive load.
    #[default]
    Rms,
    /// Perceptual curve for incandescent-style loads.
    Logarithmic,
}

impl From<router_config::CurveCfg> for DimmerCurve {
    fn from(c: router_config::CurveCfg) -> Self {
        match c {
            router_config::CurveCfg::Linear => Self::Linear,
            router_config::CurveCfg::Rms => Self::Rms,
            router_config::CurveCfg::Logarithmic => Self::Logarithmic,
        }
    }
}

/// Fraction of full resistive power delivered when firing `delay_us` after
/// the zero-crossing of a `half_period_us` half-cycle.
///
/// For firing angle a = pi * delay / T the conducted fraction is
/// (pi - a + sin(2a)/2) / pi.
#[must_use]
pub fn conducted_power_fraction(delay_us: u32, half_period_us: u32) -> f32 {
    if half_period_us == 0 {
        return 0.0;
    }
    let alpha = std::f32::consts::PI * (delay_us as f32 / half_period_us as f32).clamp(0.0, 1.0);
    (std::f32::consts::PI - alpha + (2.0 * alpha).sin() / 2.0) / std::f32::consts::PI
}

impl DimmerCurve {
    /// Firing delay after the zero-crossing for an effective level in
    /// percent. `None` means the gate stays disarmed for this half-cycle.
    #[must_use]
    pub fn firing_delay_us(self, percent: f32, half_period_us: u32) -> Option<u32> {
        let p = clamp_level(percent);
        if p <= 0.0 || half_period_us == 0 {
            return None;
        }
        if p >= 100.0 {
            return Some(0);
        }
        let fraction = match self {
            Self::Linear => p / 100.0,
            Self::Logarithmic => {
                // Map percent through a decade curve, then cut linearly.
                (10.0_f32.powf(p / 100.0) - 1.0) / 9.0
            }
            Self::Rms => return Some(Self::rms_delay(p, half_period_us)),
        };
        let delay = (half_period_us as f32 * (1.0 - fraction)).round() as u32;
        Some(delay.min(half_period_us.saturating_sub(MIN_CONDUCTION_US)))
    }

    /// Invert `conducted_power_fraction` by bisection. The fraction is
    /// strictly decreasing in the firing angle, so 24 halvings pin the
    /// angle well below one microsecond of delay error.
    fn rms_delay(percent: f32, half_period_us: u32) -> u32 {
        let target = percent / 100.0;
        let mut lo = 0.0_f32;
        let mut hi = std::f32::consts::PI;
        for _ in 0..24 {
            let mid = (lo + hi) / 2.0;
            let f = (std::f32::consts::PI - mid + (2.0 * mid).sin() / 2.0)
                / std::f32::consts::PI;
            if f > target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let alpha = (lo + hi) / 2.0;
        let delay = (half_period_us as f32 * alpha / std::f32::consts::PI).round() as u32;
        delay.min(half_period_us.saturating_sub(MIN_CONDUCTION_US))
    }
}

/// Observable state of one dimmer channel.
#[derive(Debug, Clone, Copy)]
pub struct DimmerChannelState {
    pub pin: u8,
    /// Current effective level, percent (rounds the ramp position).
    pub power_percent: u8,
    /// Level the channel is ramping toward (equals `power_percent` when no
    /// ramp is active).
    pub target_percent: u8,
    pub curve: DimmerCurve,
    /// True when the channel conducts this half-cycle.
    pub active: bool,
}

struct Ramp {
    from: f32,
    target: f32,
    start_ms: u64,
    duration_ms: u32,
}

struct Channel {
    pin: u8,
    gate: Box<dyn TriacGate + Send>,
    curve: DimmerCurve,
    /// Effective level with sub-percent resolution while ramping.
    level: f32,
    target: f32,
    ramp: Option<Ramp>,
    armed: bool,
}

impl Channel {
    /// Advance the ramp (if any) and return the level to apply now.
    fn step(&mut self, now_ms: u64) -> f32 {
        if let Some(ramp) = &self.ramp {
            let elapsed = now_ms.saturating_sub(ramp.start_ms) as f32;
            let progress = if ramp.duration_ms == 0 {
                1.0
            } else {
                (elapsed / ramp.duration_ms as f32).min(1.0)
            };
            self.level = ramp.from + (ramp.target - ramp.from) * progress;
            if progress >= 1.0 {
                self.level = ramp.target;
                self.ramp = None;
            }
        }
        self.level
    }
}

/// Owns all TRIAC gates and the per-channel levels, curves and ramps.
pub struct DimmerEngine {
    zero_cross: Arc<ZeroCrossClock>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    channels: Vec<Channel>,
    begun: bool,
}

impl DimmerEngine {
    /// Build the engine around externally constructed gate drivers. Levels
    /// start at zero; nothing conducts until [`Self::begin`] has run.
    #[must_use]
    pub fn new(
        zero_cross: Arc<ZeroCrossClock>,
        gates: Vec<(u8, Box<dyn TriacGate + Send>)>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        let channels = gates
            .into_iter()
            .map(|(pin, gate)| Channel {
                pin,
                gate,
                curve: DimmerCurve::default(),
                level: 0.0,
                target: 0.0,
                ramp: None,
                armed: false,
            })
            .collect();
        Self {
            zero_cross,
            clock,
            epoch,
            channels,
            begun: false,
        }
    }

    /// Initialize every gate into a known-off state and select the curve.
    ///
    /// On any gate failure the already-initialized gates are driven back
    /// off before the error is returned, so a partial begin never leaves a
    /// channel conducting.
    pub fn begin(&mut self, curve: DimmerCurve) -> std::result::Result<(), BeginError> {
        if self.channels.is_empty() {
            return Err(BeginError::NoChannels);
        }
        for idx in 0..self.channels.len() {
            let ch = &mut self.channels[idx];
            ch.curve = curve;
            ch.level = 0.0;
            ch.target = 0.0;
            ch.ramp = None;
            ch.armed = false;
            if let Err(e) = ch.gate.disarm() {
                let reason = e.to_string();
                for prev in &mut self.channels[..idx] {
                    if let Err(re) = prev.gate.disarm() {
                        tracing::warn!(pin = prev.pin, error = %re, "rollback disarm failed");
                    }
                }
                return Err(BeginError::Gate { index: idx, reason });
            }
        }
        self.begun = true;
        tracing::info!(channels = self.channels.len(), ?curve, "dimmer initialized");
        Ok(())
    }

    /// Number of configured output channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Set a channel's power immediately, cancelling any ramp in flight.
    /// Levels above 100 are clamped to 100.
    pub fn set_power(&mut self, channel: usize, percent: u8) -> std::result::Result<(), RouterError> {
        self.ensure_ready(channel)?;
        let level = f32::from(percent.min(100));
        let ch = &mut self.channels[channel];
        ch.ramp = None;
        ch.level = level;
        ch.target = level;
        self.apply_channel(channel)
    }

    /// Ramp a channel to `percent` over `duration_ms` (default 500 ms,
    /// clamped to 5000 ms). A zero duration applies immediately.
    pub fn set_power_smooth(
        &mut self,
        channel: usize,
        percent: u8,
        duration_ms: Option<u32>,
    ) -> std::result::Result<(), RouterError> {
        self.ensure_ready(channel)?;
        let duration = duration_ms.unwrap_or(DEFAULT_RAMP_MS).min(MAX_RAMP_MS);
        if duration == 0 {
            return self.set_power(channel, percent);
        }
        let target = f32::from(percent.min(100));
        let now_ms = self.clock.ms_since(self.epoch);
        let ch = &mut self.channels[channel];
        ch.target = target;
        ch.ramp = Some(Ramp {
            from: ch.level,
            target,
            start_ms: now_ms,
            duration_ms: duration,
        });
        Ok(())
    }

    /// Switch a channel's curve. The commanded level is preserved; only the
    /// percent-to-delay mapping changes from the next half-cycle on.
    pub fn set_curve(&mut self, channel: usize, curve: DimmerCurve) -> std::result::Result<(), RouterError> {
        self.ensure_ready(channel)?;
        self.channels[channel].curve = curve;
        self.apply_channel(channel)
    }

    /// Drive every channel to zero and disarm every gate.
    ///
    /// Best-effort: all gates are attempted even after a failure, and the
    /// first error is reported once the sweep completes.
    pub fn all_off(&mut self) -> std::result::Result<(), RouterError> {
        let mut first_err = None;
        for ch in &mut self.channels {
            ch.ramp = None;
            ch.level = 0.0;
            ch.target = 0.0;
            ch.armed = false;
            if let Err(e) = ch.gate.disarm() {
                tracing::warn!(pin = ch.pin, error = %e, "disarm failed during all_off");
                if first_err.is_none() {
                    first_err = Some(map_hw_error(e.as_ref()));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current effective level of a channel, percent. Out-of-range channels
    /// read as 0 rather than erroring, matching the other read-only getters.
    #[must_use]
    pub fn get_power(&self, channel: usize) -> u8 {
        self.channels
            .get(channel)
            .map_or(0, |ch| clamp_level(ch.level).round() as u8)
    }

    /// Snapshot of every channel's observable state.
    #[must_use]
    pub fn channel_states(&self) -> Vec<DimmerChannelState> {
        self.channels
            .iter()
            .map(|ch| DimmerChannelState {
                pin: ch.pin,
                power_percent: clamp_level(ch.level).round() as u8,
                target_percent: clamp_level(ch.target).round() as u8,
                curve: ch.curve,
                active: ch.armed,
            })
            .collect()
    }

    /// Detected mains frequency in Hz (0.0 while unsettled).
    #[must_use]
    pub fn get_mains_frequency(&self) -> f32 {
        self.zero_cross.frequency_hz()
    }

    /// Half-cycle tick: advance ramps and rearm every gate with a delay
    /// computed from the live half-period.
    pub fn on_zero_cross(&mut self) {
        if !self.begun {
            return;
        }
        let now_ms = self.clock.ms_since(self.epoch);
        let half_period = self.zero_cross.half_cycle_or_nominal();
        for ch in &mut self.channels {
            let level = ch.step(now_ms);
            Self::arm_gate(ch, level, half_period);
        }
    }

    fn ensure_ready(&self, channel: usize) -> std::result::Result<(), RouterError> {
        if !self.begun {
            return Err(RouterError::State("dimmer not initialized".into()));
        }
        if channel >= self.channels.len() {
            return Err(RouterError::Channel(channel));
        }
        Ok(())
    }

    fn apply_channel(&mut self, channel: usize) -> std::result::Result<(), RouterError> {
        let half_period = self.zero_cross.half_cycle_or_nominal();
        let ch = &mut self.channels[channel];
        let level = ch.level;
        Self::arm_gate_checked(ch, level, half_period)
    }

    fn arm_gate(ch: &mut Channel, level: f32, half_period_us: u32) {
        if let Err(e) = Self::arm_gate_checked(ch, level, half_period_us) {
            tracing::warn!(pin = ch.pin, error = %e, "gate update failed");
        }
    }

    fn arm_gate_checked(
        ch: &mut Channel,
        level: f32,
        half_period_us: u32,
    ) -> std::result::Result<(), RouterError> {
        match ch.curve.firing_delay_us(level, half_period_us) {
            Some(delay) => {
                ch.gate
                    .arm(delay)
                    .map_err(|e| map_hw_error(e.as_ref()))?;
                ch.armed = true;
            }
            None => {
                ch.gate
                    .disarm()
                    .map_err(|e| map_hw_error(e.as_ref()))?;
                ch.armed = false;
            }
        }
        Ok(())
    }
}
