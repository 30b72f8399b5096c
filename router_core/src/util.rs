//! Common time/period helpers for router_core.

/// Duration of the RMS/active-power accumulation window.
pub const WINDOW_MS: u64 = 200;

/// Per-channel frame count accumulated over one measurement window.
#[inline]
pub fn window_frames(sample_rate_hz: u32) -> u32 {
    ((u64::from(sample_rate_hz.max(1)) * WINDOW_MS / 1_000).max(1)) as u32
}

/// Clamp a control level to the valid [0, 100] percent range.
/// Non-finite values map to 0.
#[inline]
pub fn clamp_level(level: f32) -> f32 {
    if !level.is_finite() {
        return 0.0;
    }
    level.clamp(0.0, 100.0)
}
