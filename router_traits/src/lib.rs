pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Burst-oriented ADC source.
///
/// One call returns one fixed-cadence burst of interleaved 12-bit samples
/// (channel 0, channel 1, ..., channel 0, ...). Implementations fill the
/// caller's buffer to avoid per-burst allocation on the acquisition thread.
pub trait AdcBurst {
    /// Block until the next burst is available, append its samples to `buf`
    /// and return the burst timestamp in microseconds (monotonic).
    fn read_burst(
        &mut self,
        buf: &mut Vec<u16>,
        timeout: std::time::Duration,
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>>;
}

/// TRIAC gate driver for one dimmer output.
pub trait TriacGate {
    /// Schedule the gate trigger `delay_us` after the next zero-crossing.
    fn arm(&mut self, delay_us: u32) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Cancel any pending trigger and hold the output off.
    fn disarm(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
