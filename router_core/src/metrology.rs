//! Power metrology over fixed accumulation windows.
//!
//! Raw interleaved bursts are demultiplexed per channel and folded into
//! sum-of-squares and voltage-current product accumulators. When one
//! window's worth of frames (200 ms, about ten 50 Hz cycles) has been
//! accumulated, a [`Measurements`] snapshot is computed and handed to the
//! registered consumer by value.
//!
//! The first window after startup is a settling window: channels without a
//! configured mid-scale offset measure their own from the mean raw code,
//! and no snapshot is delivered for it.

use std::sync::Arc;

use crate::acquisition::{DiagCounters, RawBurst};
use crate::channel::{ChannelConfig, SensorKind, SensorMap};
use crate::error::RouterError;
use crate::measure::{Measurements, PhaseSign, PowerDirection, WindowQuality, MAX_CHANNELS};
use crate::util::window_frames;

/// Mid-scale fallback for a 12-bit converter when a channel has neither a
/// configured nor a measured offset.
const DEFAULT_MIDSCALE: f32 = 2048.0;

/// Mean centered codes within this band count as a balanced AC signal.
const PHASE_BALANCE_CODES: f32 = 2.0;

/// Window wall time may deviate this much from nominal before the window
/// is flagged degraded.
const WALL_TIME_TOLERANCE: f64 = 0.20;

const NOMINAL_WINDOW_US: f64 = 200_000.0;

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    sum_sq: f64,
    sum_vi: f64,
    sum_raw: f64,
}

impl Accumulator {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

struct Slot {
    cfg: ChannelConfig,
    acc: Accumulator,
    offset: f32,
}

type WindowCallback = Box<dyn FnMut(&Measurements) + Send>;

pub struct MetrologyEngine {
    slots: Vec<Slot>,
    voltage_idx: Option<usize>,
    frames_per_window: u32,
    direction_epsilon_w: f32,
    counters: Arc<DiagCounters>,
    callback: Option<WindowCallback>,
    /// Timestamp of the burst that opened the current window.
    window_start_us: Option<u64>,
    frames_in_window: u32,
    dropped_at_window_start: u64,
    /// True while the initial offset-settling window runs.
    settling: bool,
    last_window: Option<Measurements>,
}

impl MetrologyEngine {
    /// Build the engine for an ordered channel list.
    ///
    /// `direction_epsilon_w` is the deadband below which active power is
    /// reported as [`PowerDirection::Zero`].
    pub fn new(
        channels: &[ChannelConfig],
        sample_rate_hz: u32,
        direction_epsilon_w: f32,
        counters: Arc<DiagCounters>,
    ) -> std::result::Result<Self, RouterError> {
        let map = SensorMap::build(channels)?;
        let settling = channels.iter().any(|c| c.offset.is_none());
        let slots = channels
            .iter()
            .map(|cfg| Slot {
                cfg: *cfg,
                acc: Accumulator::default(),
                offset: cfg.offset.unwrap_or(DEFAULT_MIDSCALE),
            })
            .collect();
        Ok(Self {
            slots,
            voltage_idx: map.voltage,
            frames_per_window: window_frames(sample_rate_hz),
            direction_epsilon_w: direction_epsilon_w.max(0.0),
            counters,
            callback: None,
            window_start_us: None,
            frames_in_window: 0,
            dropped_at_window_start: 0,
            settling,
            last_window: None,
        })
    }

    /// Register the window consumer, replacing any previous one. There is a
    /// single slot on purpose; fan-out belongs to the consumer.
    pub fn set_results_callback(&mut self, cb: impl FnMut(&Measurements) + Send + 'static) {
        self.callback = Some(Box::new(cb));
    }

    /// The snapshot of the most recently completed window, if any.
    #[must_use]
    pub fn last_window(&self) -> Option<Measurements> {
        self.last_window
    }

    /// Number of channels in each interleaved frame.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.slots.len()
    }

    /// Fold one burst into the running window, closing windows as their
    /// frame budget fills. A burst may straddle a window boundary; the
    /// remainder seeds the next window.
    pub fn process_burst(&mut self, burst: &RawBurst) {
        let n = self.slots.len();
        if n == 0 {
            return;
        }
        if self.window_start_us.is_none() {
            self.open_window(burst.t_us);
        }
        for frame in burst.samples.chunks_exact(n) {
            self.accumulate_frame(frame);
            self.counters
                .frames_processed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.frames_in_window += 1;
            if self.frames_in_window >= self.frames_per_window {
                self.close_window(burst.t_us);
                self.open_window(burst.t_us);
            }
        }
        let leftover = burst.samples.len() % n;
        if leftover != 0 {
            tracing::warn!(leftover, "burst length not a multiple of channel count");
        }
    }

    fn open_window(&mut self, t_us: u64) {
        self.window_start_us = Some(t_us);
        self.frames_in_window = 0;
        self.dropped_at_window_start = self
            .counters
            .bursts_dropped
            .load(std::sync::atomic::Ordering::Relaxed);
        for slot in &mut self.slots {
            slot.acc.reset();
        }
    }

    fn accumulate_frame(&mut self, frame: &[u16]) {
        if self.settling {
            for (slot, &code) in self.slots.iter_mut().zip(frame) {
                slot.acc.sum_raw += f64::from(code);
            }
            return;
        }
        let v_centered = self
            .voltage_idx
            .map(|vi| f64::from(frame[vi]) - f64::from(self.slots[vi].offset));
        for (idx, (slot, &code)) in self.slots.iter_mut().zip(frame).enumerate() {
            let c = f64::from(code) - f64::from(slot.offset);
            slot.acc.sum_raw += f64::from(code);
            slot.acc.sum_sq += c * c;
            if Some(idx) != self.voltage_idx
                && let Some(v) = v_centered
            {
                slot.acc.sum_vi += v * c;
            }
        }
    }

    fn close_window(&mut self, t_us: u64) {
        let frames = f64::from(self.frames_in_window.max(1));

        if self.settling {
            for slot in &mut self.slots {
                if slot.cfg.offset.is_none() {
                    slot.offset = (slot.acc.sum_raw / frames) as f32;
                    tracing::debug!(
                        sensor = ?slot.cfg.sensor,
                        offset = slot.offset,
                        "auto offset measured"
                    );
                }
            }
            self.settling = false;
            return;
        }

        let mut m = Measurements {
            timestamp_ms: t_us / 1_000,
            ..Measurements::default()
        };

        let v_mult = self.voltage_idx.map(|vi| self.slots[vi].cfg.multiplier);
        if let Some(vi) = self.voltage_idx {
            let slot = &self.slots[vi];
            m.voltage_rms = ((slot.acc.sum_sq / frames).sqrt() as f32) * slot.cfg.multiplier.abs();
            m.voltage_dc_raw = (slot.acc.sum_raw / frames) as f32;
            m.voltage_phase = phase_sign(slot.acc.sum_raw / frames - f64::from(slot.offset));
        }

        for (idx, slot) in self.slots.iter().enumerate().take(MAX_CHANNELS) {
            if Some(idx) == self.voltage_idx {
                continue;
            }
            if !matches!(
                slot.cfg.sensor,
                SensorKind::CurrentGrid | SensorKind::CurrentSolar | SensorKind::CurrentLoad(_)
            ) {
                continue;
            }
            m.current_rms[idx] =
                ((slot.acc.sum_sq / frames).sqrt() as f32) * slot.cfg.multiplier.abs();
            m.current_phase[idx] = phase_sign(slot.acc.sum_raw / frames - f64::from(slot.offset));
            match v_mult {
                Some(vm) => {
                    let p = ((slot.acc.sum_vi / frames) as f32) * vm * slot.cfg.multiplier;
                    m.power_active[idx] = p;
                    m.direction[idx] = if p > self.direction_epsilon_w {
                        PowerDirection::Consuming
                    } else if p < -self.direction_epsilon_w {
                        PowerDirection::Supplying
                    } else {
                        PowerDirection::Zero
                    };
                }
                None => {
                    // Without a voltage reference there is no signed power.
                    m.power_active[idx] = 0.0;
                    m.direction[idx] = PowerDirection::Unknown;
                }
            }
        }

        m.quality = self.window_quality(t_us);
        self.counters
            .windows_completed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.last_window = Some(m);
        if let Some(cb) = &mut self.callback {
            cb(&m);
        }
    }

    fn window_quality(&self, close_us: u64) -> WindowQuality {
        let dropped_now = self
            .counters
            .bursts_dropped
            .load(std::sync::atomic::Ordering::Relaxed);
        if dropped_now != self.dropped_at_window_start {
            return WindowQuality::Degraded;
        }
        if let Some(start) = self.window_start_us {
            let elapsed = close_us.saturating_sub(start) as f64;
            // Elapsed spans first burst start to closing burst start, one
            // burst short of the nominal window.
            let nominal = NOMINAL_WINDOW_US;
            if elapsed > nominal * (1.0 + WALL_TIME_TOLERANCE)
                || elapsed < nominal * (1.0 - 2.0 * WALL_TIME_TOLERANCE)
            {
                return WindowQuality::Degraded;
            }
        }
        WindowQuality::Full
    }
}

// DC balance of the centered signal, not correlation with the voltage;
// the correlation sign flows into power_active and direction instead.
fn phase_sign(mean_centered: f64) -> PhaseSign {
    if mean_centered > f64::from(PHASE_BALANCE_CODES) {
        PhaseSign::Positive
    } else if mean_centered < -f64::from(PHASE_BALANCE_CODES) {
        PhaseSign::Negative
    } else {
        PhaseSign::Balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SensorKind;

    fn cfg(sensor: SensorKind, multiplier: f32, offset: Option<f32>) -> ChannelConfig {
        ChannelConfig {
            sensor,
            multiplier,
            offset,
        }
    }

    /// Feed a full 200 ms window of synthetic 50 Hz mains as twenty 10 ms
    /// bursts. `phase` shifts the current waveform relative to voltage.
    fn feed_window(
        engine: &mut MetrologyEngine,
        v_amp_codes: f32,
        i_amp_codes: f32,
        i_phase_rad: f32,
    ) {
        let sample_rate = 20_000.0_f32;
        let mut t_us = 0u64;
        let mut k = 0u32;
        for _ in 0..20 {
            let mut samples = Vec::with_capacity(400);
            for _ in 0..200 {
                let theta = 2.0 * std::f32::consts::PI * 50.0 * (k as f32) / sample_rate;
                let v = 2048.0 + v_amp_codes * theta.sin();
                let i = 2048.0 + i_amp_codes * (theta + i_phase_rad).sin();
                samples.push(v.round() as u16);
                samples.push(i.round() as u16);
                k += 1;
            }
            engine.process_burst(&RawBurst { t_us, samples });
            t_us += 10_000;
        }
    }

    fn grid_engine() -> (MetrologyEngine, Arc<DiagCounters>) {
        let counters = Arc::new(DiagCounters::default());
        let channels = [
            cfg(SensorKind::VoltageAc, 0.25, Some(2048.0)),
            cfg(SensorKind::CurrentGrid, 0.01, Some(2048.0)),
        ];
        let engine =
            MetrologyEngine::new(&channels, 20_000, 2.0, Arc::clone(&counters)).unwrap();
        (engine, counters)
    }

    #[test]
    fn in_phase_window_reports_import() {
        let (mut engine, counters) = grid_engine();
        feed_window(&mut engine, 1300.0, 1000.0, 0.0);
        let m = engine.last_window().expect("window should complete");

        // 1300 codes * 0.25 V/code amplitude => 325 V peak, ~229.8 V RMS.
        assert!((m.voltage_rms - 229.8).abs() < 3.0, "vrms {}", m.voltage_rms);
        // 1000 codes * 0.01 A/code => 10 A peak, ~7.07 A RMS.
        assert!((m.current_rms[1] - 7.07).abs() < 0.1);
        // In phase: P = Vrms * Irms ~= 1625 W, importing.
        assert!((m.power_active[1] - 1625.0).abs() < 25.0, "p {}", m.power_active[1]);
        assert_eq!(m.direction[1], PowerDirection::Consuming);
        assert_eq!(m.quality, WindowQuality::Full);
        assert_eq!(counters.snapshot().windows_completed, 1);
    }

    #[test]
    fn anti_phase_window_reports_export() {
        let (mut engine, _) = grid_engine();
        feed_window(&mut engine, 1300.0, 1000.0, std::f32::consts::PI);
        let m = engine.last_window().unwrap();
        assert!(m.power_active[1] < -1500.0);
        assert_eq!(m.direction[1], PowerDirection::Supplying);
    }

    #[test]
    fn tiny_power_lands_in_deadband() {
        let (mut engine, _) = grid_engine();
        // Quadrature: real power integrates to ~0 despite current flowing.
        feed_window(&mut engine, 1300.0, 1000.0, std::f32::consts::FRAC_PI_2);
        let m = engine.last_window().unwrap();
        assert!(m.power_active[1].abs() < 2.0);
        assert_eq!(m.direction[1], PowerDirection::Zero);
        assert!(m.current_rms[1] > 7.0);
    }

    #[test]
    fn settling_window_measures_offset_and_stays_private() {
        let counters = Arc::new(DiagCounters::default());
        let channels = [
            cfg(SensorKind::VoltageAc, 0.25, None),
            cfg(SensorKind::CurrentGrid, 0.01, None),
        ];
        let mut engine =
            MetrologyEngine::new(&channels, 20_000, 2.0, Arc::clone(&counters)).unwrap();
        let hits = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let hits_cb = Arc::clone(&hits);
        engine.set_results_callback(move |_| {
            hits_cb.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        });

        // First window settles, second delivers.
        feed_window(&mut engine, 1300.0, 1000.0, 0.0);
        assert!(engine.last_window().is_none());
        assert_eq!(counters.snapshot().windows_completed, 0);
        feed_window(&mut engine, 1300.0, 1000.0, 0.0);
        assert_eq!(hits.load(std::sync::atomic::Ordering::Relaxed), 1);
        let m = engine.last_window().unwrap();
        assert!((m.voltage_rms - 229.8).abs() < 3.0);
    }

    #[test]
    fn dropped_bursts_degrade_the_window() {
        let (mut engine, counters) = grid_engine();
        // Start the window, then record a drop mid-window.
        let half: Vec<u16> = vec![2048; 400];
        engine.process_burst(&RawBurst {
            t_us: 0,
            samples: half.clone(),
        });
        counters
            .bursts_dropped
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        for b in 1..20u64 {
            engine.process_burst(&RawBurst {
                t_us: b * 10_000,
                samples: half.clone(),
            });
        }
        let m = engine.last_window().unwrap();
        assert_eq!(m.quality, WindowQuality::Degraded);
    }

    #[test]
    fn stretched_window_wall_time_degrades() {
        let (mut engine, _) = grid_engine();
        let burst: Vec<u16> = vec![2048; 400];
        for b in 0..20u64 {
            // 20 ms between 10 ms bursts: wall time doubles.
            engine.process_burst(&RawBurst {
                t_us: b * 20_000,
                samples: burst.clone(),
            });
        }
        let m = engine.last_window().unwrap();
        assert_eq!(m.quality, WindowQuality::Degraded);
    }

    #[test]
    fn four_channel_window_resolves_every_role() {
        let counters = Arc::new(DiagCounters::default());
        let channels = [
            cfg(SensorKind::VoltageAc, 0.25, Some(2048.0)),
            cfg(SensorKind::CurrentGrid, 0.01, Some(2048.0)),
            cfg(SensorKind::CurrentSolar, 0.01, Some(2048.0)),
            cfg(SensorKind::CurrentLoad(0), 0.01, Some(2048.0)),
        ];
        let mut engine =
            MetrologyEngine::new(&channels, 20_000, 2.0, Arc::clone(&counters)).unwrap();

        // Grid exports (anti-phase), solar and the load consume (in phase).
        let mut t_us = 0u64;
        let mut k = 0u32;
        for _ in 0..20 {
            let mut samples = Vec::with_capacity(800);
            for _ in 0..200 {
                let theta = 2.0 * std::f32::consts::PI * 50.0 * (k as f32) / 20_000.0;
                samples.push((2048.0 + 1300.0 * theta.sin()).round() as u16);
                samples.push((2048.0 - 800.0 * theta.sin()).round() as u16);
                samples.push((2048.0 + 600.0 * theta.sin()).round() as u16);
                samples.push((2048.0 + 400.0 * theta.sin()).round() as u16);
                k += 1;
            }
            engine.process_burst(&RawBurst { t_us, samples });
            t_us += 10_000;
        }

        let m = engine.last_window().expect("window should complete");
        assert!((m.voltage_rms - 229.8).abs() < 3.0, "vrms {}", m.voltage_rms);
        assert_eq!(m.direction[1], PowerDirection::Supplying);
        assert_eq!(m.direction[2], PowerDirection::Consuming);
        assert_eq!(m.direction[3], PowerDirection::Consuming);
        assert!(m.power_active[1] < -1_000.0);
        assert!(m.power_active[2] > m.power_active[3]);
        assert_eq!(m.quality, WindowQuality::Full);
        assert_eq!(counters.snapshot().frames_processed, 4_000);
    }

    #[test]
    fn phase_fields_report_dc_balance_not_correlation() {
        // Anti-phase current correlates negatively with the voltage, yet
        // both signals average out around midscale.
        let (mut engine, _) = grid_engine();
        feed_window(&mut engine, 1300.0, 1000.0, std::f32::consts::PI);
        let m = engine.last_window().unwrap();
        assert_eq!(m.direction[1], PowerDirection::Supplying);
        assert_eq!(m.voltage_phase, PhaseSign::Balanced);
        assert_eq!(m.current_phase[1], PhaseSign::Balanced);

        // A DC shift on the current channel trips the balance check.
        let (mut engine, _) = grid_engine();
        let mut t_us = 0u64;
        let mut k = 0u32;
        for _ in 0..20 {
            let mut samples = Vec::with_capacity(400);
            for _ in 0..200 {
                let theta = 2.0 * std::f32::consts::PI * 50.0 * (k as f32) / 20_000.0;
                samples.push((2048.0 + 1300.0 * theta.sin()).round() as u16);
                samples.push((2098.0 + 1000.0 * theta.sin()).round() as u16);
                k += 1;
            }
            engine.process_burst(&RawBurst { t_us, samples });
            t_us += 10_000;
        }
        let m = engine.last_window().unwrap();
        assert_eq!(m.current_phase[1], PhaseSign::Positive);
        assert_eq!(m.voltage_phase, PhaseSign::Balanced);
    }

    #[test]
    fn current_only_setup_reports_unknown_direction() {
        let counters = Arc::new(DiagCounters::default());
        let channels = [cfg(SensorKind::CurrentLoad(0), 0.01, Some(2048.0))];
        let mut engine = MetrologyEngine::new(&channels, 20_000, 2.0, counters).unwrap();
        let mut t_us = 0u64;
        let mut k = 0u32;
        for _ in 0..20 {
            let mut samples = Vec::with_capacity(200);
            for _ in 0..200 {
                let theta = 2.0 * std::f32::consts::PI * 50.0 * (k as f32) / 20_000.0;
                samples.push((2048.0 + 1000.0 * theta.sin()).round() as u16);
                k += 1;
            }
            engine.process_burst(&RawBurst { t_us, samples });
            t_us += 10_000;
        }
        let m = engine.last_window().unwrap();
        assert!(m.current_rms[0] > 7.0);
        assert_eq!(m.direction[0], PowerDirection::Unknown);
        assert_eq!(m.power_active[0], 0.0);
    }
}
