//! Software mains simulator.
//!
//! Synthesizes interleaved 12-bit bursts of mains voltage and currents at
//! the real acquisition cadence, and reports zero-crossing instants to an
//! attached edge sink. Good enough to run the whole router on a laptop.

use std::time::{Duration, Instant};

use router_traits::{AdcBurst, TriacGate};

use crate::error::HwError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type EdgeSink = Box<dyn FnMut(u64) + Send>;

/// One synthesized waveform: `offset + amplitude * sin(theta + phase)`,
/// in raw ADC codes.
#[derive(Debug, Clone, Copy)]
pub struct SimChannel {
    pub amplitude_codes: f32,
    pub phase_rad: f32,
    pub offset_codes: f32,
}

impl SimChannel {
    /// Mains voltage channel at mid-scale.
    #[must_use]
    pub const fn voltage(amplitude_codes: f32) -> Self {
        Self {
            amplitude_codes,
            phase_rad: 0.0,
            offset_codes: 2048.0,
        }
    }

    /// Current channel; positive `amplitude_codes` is in phase with the
    /// voltage (importing), negative is anti-phase (exporting).
    #[must_use]
    pub const fn current(amplitude_codes: f32) -> Self {
        Self {
            amplitude_codes,
            phase_rad: 0.0,
            offset_codes: 2048.0,
        }
    }
}

pub struct SimMainsAdc {
    channels: Vec<SimChannel>,
    sample_rate_hz: u32,
    frames_per_burst: u32,
    mains_hz: f32,
    edge_sink: Option<EdgeSink>,
    /// When true, bursts are produced as fast as the consumer asks,
    /// keeping simulated timestamps; used by tests.
    unpaced: bool,
    start: Instant,
    burst_index: u64,
    sample_index: u64,
    edges_emitted: u64,
}

impl SimMainsAdc {
    #[must_use]
    pub fn new(channels: Vec<SimChannel>, sample_rate_hz: u32, burst_ms: u32, mains_hz: f32) -> Self {
        Self {
            channels,
            sample_rate_hz: sample_rate_hz.max(1),
            frames_per_burst: (sample_rate_hz.max(1) * burst_ms.max(1) / 1_000).max(1),
            mains_hz,
            edge_sink: None,
            unpaced: false,
            start: Instant::now(),
            burst_index: 0,
            sample_index: 0,
            edges_emitted: 0,
        }
    }

    /// Attach the zero-crossing consumer. Called from the acquisition
    /// thread with the simulated edge timestamp in microseconds.
    #[must_use]
    pub fn with_edge_sink(mut self, sink: impl FnMut(u64) + Send + 'static) -> Self {
        self.edge_sink = Some(Box::new(sink));
        self
    }

    /// Disable real-time pacing; bursts are produced on demand.
    #[must_use]
    pub fn unpaced(mut self) -> Self {
        self.unpaced = true;
        self
    }

    fn burst_period(&self) -> Duration {
        Duration::from_micros(
            u64::from(self.frames_per_burst) * 1_000_000 / u64::from(self.sample_rate_hz),
        )
    }

    fn half_period_us(&self) -> u64 {
        (500_000.0 / self.mains_hz.max(1.0)) as u64
    }
}

impl AdcBurst for SimMainsAdc {
    fn read_burst(&mut self, buf: &mut Vec<u16>, _timeout: Duration) -> Result<u64, BoxError> {
        if self.channels.is_empty() {
            return Err(Box::new(HwError::Adc("no simulated channels".into())));
        }
        let t_us = self.burst_index * self.burst_period().as_micros() as u64;
        if !self.unpaced {
            let due = self.start + self.burst_period() * self.burst_index as u32;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        let omega = 2.0 * std::f32::consts::PI * self.mains_hz;
        buf.reserve(self.frames_per_burst as usize * self.channels.len());
        for _ in 0..self.frames_per_burst {
            let t_s = self.sample_index as f32 / self.sample_rate_hz as f32;
            for ch in &self.channels {
                let code = ch.offset_codes + ch.amplitude_codes * (omega * t_s + ch.phase_rad).sin();
                buf.push(code.clamp(0.0, 4095.0).round() as u16);
            }
            self.sample_index += 1;
        }
        self.burst_index += 1;

        // Report every half-cycle boundary that fell inside this burst.
        let t_end_us = self.burst_index * self.burst_period().as_micros() as u64;
        let hp = self.half_period_us();
        if let Some(sink) = &mut self.edge_sink {
            while (self.edges_emitted + 1) * hp <= t_end_us {
                self.edges_emitted += 1;
                sink(self.edges_emitted * hp);
            }
        }
        Ok(t_us)
    }
}

/// Gate driver that only tracks its state; the simulated load is implied
/// by the waveform generator, so arming has no electrical effect.
#[derive(Debug, Default)]
pub struct SimGate {
    armed: bool,
    delay_us: u32,
}

impl SimGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    #[must_use]
    pub const fn delay_us(&self) -> u32 {
        self.delay_us
    }
}

impl TriacGate for SimGate {
    fn arm(&mut self, delay_us: u32) -> Result<(), BoxError> {
        self.armed = true;
        self.delay_us = delay_us;
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), BoxError> {
        self.armed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn bursts_carry_interleaved_channels() {
        let mut adc = SimMainsAdc::new(
            vec![SimChannel::voltage(1300.0), SimChannel::current(1000.0)],
            20_000,
            10,
            50.0,
        )
        .unpaced();
        let mut buf = Vec::new();
        let t0 = adc.read_burst(&mut buf, Duration::from_millis(5)).unwrap();
        assert_eq!(t0, 0);
        assert_eq!(buf.len(), 400);

        buf.clear();
        let t1 = adc.read_burst(&mut buf, Duration::from_millis(5)).unwrap();
        assert_eq!(t1, 10_000);
    }

    #[test]
    fn edges_land_on_half_cycle_boundaries() {
        let edges = Arc::new(Mutex::new(Vec::new()));
        let sink_edges = Arc::clone(&edges);
        let mut adc = SimMainsAdc::new(vec![SimChannel::voltage(1300.0)], 20_000, 10, 50.0)
            .unpaced()
            .with_edge_sink(move |t_us| sink_edges.lock().unwrap().push(t_us));

        let mut buf = Vec::new();
        for _ in 0..4 {
            buf.clear();
            adc.read_burst(&mut buf, Duration::from_millis(5)).unwrap();
        }
        // 40 ms of 50 Hz mains: edges at every 10 ms boundary.
        assert_eq!(*edges.lock().unwrap(), vec![10_000, 20_000, 30_000, 40_000]);
    }

    #[test]
    fn codes_stay_within_twelve_bits() {
        let mut adc = SimMainsAdc::new(vec![SimChannel::voltage(5000.0)], 20_000, 10, 50.0)
            .unpaced();
        let mut buf = Vec::new();
        adc.read_burst(&mut buf, Duration::from_millis(5)).unwrap();
        assert!(buf.iter().all(|&c| c <= 4095));
    }
}
