//! Test doubles for the hardware seams.
//!
//! Shipped in the library (not behind `cfg(test)`) so integration tests
//! and downstream crates can drive the pipeline without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use router_traits::{AdcBurst, TriacGate};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Default)]
struct GateInner {
    armed: bool,
    delays: Vec<u32>,
    disarm_count: u32,
    fail: bool,
}

/// TRIAC gate double that records every arm/disarm it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingGate {
    inner: Arc<Mutex<GateInner>>,
}

impl RecordingGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent arm/disarm calls fail.
    pub fn set_fail(&self, fail: bool) {
        if let Ok(mut g) = self.inner.lock() {
            g.fail = fail;
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.lock().map(|g| g.armed).unwrap_or(false)
    }

    #[must_use]
    pub fn last_delay(&self) -> Option<u32> {
        self.inner.lock().ok().and_then(|g| g.delays.last().copied())
    }

    #[must_use]
    pub fn delays(&self) -> Vec<u32> {
        self.inner.lock().map(|g| g.delays.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn disarm_count(&self) -> u32 {
        self.inner.lock().map(|g| g.disarm_count).unwrap_or(0)
    }
}

impl TriacGate for RecordingGate {
    fn arm(&mut self, delay_us: u32) -> Result<(), BoxError> {
        let mut g = self.inner.lock().map_err(|_| "gate lock poisoned")?;
        if g.fail {
            return Err("simulated gate failure".into());
        }
        g.armed = true;
        g.delays.push(delay_us);
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), BoxError> {
        let mut g = self.inner.lock().map_err(|_| "gate lock poisoned")?;
        if g.fail {
            return Err("simulated gate failure".into());
        }
        g.armed = false;
        g.disarm_count += 1;
        Ok(())
    }
}

/// ADC double that replays a fixed script of bursts, then times out.
pub struct ScriptedAdc {
    bursts: VecDeque<(u64, Vec<u16>)>,
}

impl ScriptedAdc {
    #[must_use]
    pub fn new(bursts: Vec<(u64, Vec<u16>)>) -> Self {
        Self {
            bursts: bursts.into(),
        }
    }
}

impl AdcBurst for ScriptedAdc {
    fn read_burst(&mut self, buf: &mut Vec<u16>, timeout: Duration) -> Result<u64, BoxError> {
        match self.bursts.pop_front() {
            Some((t_us, samples)) => {
                buf.extend_from_slice(&samples);
                Ok(t_us)
            }
            None => {
                // Script exhausted: behave like a stalled converter.
                std::thread::sleep(timeout);
                Err("adc timeout".into())
            }
        }
    }
}

/// ADC double that never produces data.
#[derive(Debug, Default)]
pub struct NoopAdc;

impl AdcBurst for NoopAdc {
    fn read_burst(&mut self, _buf: &mut Vec<u16>, timeout: Duration) -> Result<u64, BoxError> {
        std::thread::sleep(timeout);
        Err("adc timeout".into())
    }
}
