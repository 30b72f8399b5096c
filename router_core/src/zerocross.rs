//! Mains zero-crossing clock.
//!
//! One writer (the edge source) feeds [`ZeroCrossClock::on_edge`]; any
//! number of readers query the latest edge, the half-cycle period and the
//! detected mains frequency without locking. The timestamp/period pair is
//! packed into a single atomic word so readers always see a consistent
//! snapshot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Number of accepted intervals averaged before the frequency locks in
/// and after each subsequent re-estimate.
const SETTLE_INTERVALS: u32 = 100;

/// Reject intervals longer than this as missed-edge gaps (below ~16 Hz).
const MAX_INTERVAL_US: u64 = 30_000;

/// Nominal half-cycle used before the first interval is measured (50 Hz).
pub const NOMINAL_HALF_CYCLE_US: u32 = 10_000;

/// Snapshot of the most recent accepted zero-crossing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfCycle {
    /// Timestamp of the edge, microseconds on the acquisition timebase.
    pub edge_us: u64,
    /// Interval to the previous accepted edge, microseconds.
    pub period_us: u32,
}

// Packing: bits 63..16 hold the edge timestamp (48 bits of microseconds,
// enough for years of uptime), bits 15..0 the half-cycle interval.
const EDGE_SHIFT: u32 = 16;
const PERIOD_MASK: u64 = 0xFFFF;

pub struct ZeroCrossClock {
    min_edge_interval_us: u64,
    snapshot: AtomicU64,
    /// Detected mains frequency in millihertz, 0 until settled.
    freq_mhz: AtomicU32,
    /// Count of accepted edges, used by consumers as a dispatch sequence.
    edges: AtomicU64,
    last_edge_us: AtomicU64,
    interval_sum_us: AtomicU64,
    interval_count: AtomicU32,
}

impl ZeroCrossClock {
    #[must_use]
    pub fn new(min_edge_interval_us: u64) -> Self {
        Self {
            min_edge_interval_us,
            snapshot: AtomicU64::new(0),
            freq_mhz: AtomicU32::new(0),
            edges: AtomicU64::new(0),
            last_edge_us: AtomicU64::new(0),
            interval_sum_us: AtomicU64::new(0),
            interval_count: AtomicU32::new(0),
        }
    }

    /// Feed one detected edge at acquisition time `t_us`.
    ///
    /// Returns `false` when the edge was rejected by debouncing. Edges
    /// closer than the configured minimum interval are treated as contact
    /// chatter or line noise and ignored.
    pub fn on_edge(&self, t_us: u64) -> bool {
        let last = self.last_edge_us.load(Ordering::Acquire);
        if last != 0 {
            let gap = t_us.saturating_sub(last);
            if gap < self.min_edge_interval_us {
                return false;
            }
        }
        self.last_edge_us.store(t_us, Ordering::Release);

        let interval = if last == 0 { 0 } else { t_us.saturating_sub(last) };
        let period = if interval > 0 && interval <= MAX_INTERVAL_US {
            self.accumulate_interval(interval);
            interval as u32
        } else {
            // First edge or a gap from missed edges: fall back to the
            // detected (or nominal) half-cycle.
            self.half_cycle_or_nominal()
        };

        let packed = (t_us << EDGE_SHIFT) | (u64::from(period) & PERIOD_MASK);
        self.snapshot.store(packed, Ordering::Release);
        self.edges.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn accumulate_interval(&self, interval: u64) {
        let sum = self.interval_sum_us.fetch_add(interval, Ordering::AcqRel) + interval;
        let n = self.interval_count.fetch_add(1, Ordering::AcqRel) + 1;
        if n < SETTLE_INTERVALS {
            return;
        }
        self.interval_sum_us.store(0, Ordering::Release);
        self.interval_count.store(0, Ordering::Release);

        let mean_us = sum / u64::from(n);
        if mean_us == 0 {
            return;
        }
        // Edges arrive once per half-cycle, so f = 1 / (2 * interval).
        let mhz = (1_000_000_000 / (2 * mean_us)) as u32;
        let locked = [50_000_u32, 60_000].iter().copied().find(|nominal| {
            mhz.abs_diff(*nominal) * 10 <= *nominal
        });
        match locked {
            Some(nominal) => {
                if self.freq_mhz.swap(mhz, Ordering::AcqRel) == 0 {
                    tracing::info!(freq_mhz = mhz, nominal_mhz = nominal, "mains frequency locked");
                }
            }
            None => {
                tracing::warn!(freq_mhz = mhz, "mains frequency outside 50/60 Hz bands");
                self.freq_mhz.store(0, Ordering::Release);
            }
        }
    }

    /// Latest accepted edge and its half-cycle interval, if any edge has
    /// been seen yet.
    #[must_use]
    pub fn half_cycle(&self) -> Option<HalfCycle> {
        let packed = self.snapshot.load(Ordering::Acquire);
        if packed == 0 {
            return None;
        }
        Some(HalfCycle {
            edge_us: packed >> EDGE_SHIFT,
            period_us: (packed & PERIOD_MASK) as u32,
        })
    }

    /// Current half-cycle estimate, falling back to the 50 Hz nominal
    /// before any interval has been measured.
    #[must_use]
    pub fn half_cycle_or_nominal(&self) -> u32 {
        match self.half_cycle() {
            Some(hc) if hc.period_us > 0 => hc.period_us,
            _ => {
                let mhz = self.freq_mhz.load(Ordering::Acquire);
                if mhz > 0 {
                    (500_000_000 / mhz).max(1)
                } else {
                    NOMINAL_HALF_CYCLE_US
                }
            }
        }
    }

    /// Detected mains frequency in Hz. Returns `0.0` until enough edges
    /// have been observed to settle on a plausible value.
    #[must_use]
    pub fn frequency_hz(&self) -> f32 {
        self.freq_mhz.load(Ordering::Acquire) as f32 / 1_000.0
    }

    /// Monotonic count of accepted edges.
    #[must_use]
    pub fn edges_seen(&self) -> u64 {
        self.edges.load(Ordering::Acquire)
    }
}
