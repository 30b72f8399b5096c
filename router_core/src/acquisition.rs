//! Background sample acquisition.
//!
//! A dedicated thread pulls fixed-cadence bursts from the ADC source and
//! forwards them over a bounded channel. The producer never blocks on a
//! slow consumer: when the queue is full the burst is dropped and counted,
//! so acquisition cadence is preserved at the cost of window integrity
//! (which the metrology engine reports through its quality flag).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as xch;
use router_traits::AdcBurst;

/// Shared diagnostics counters for the whole pipeline.
#[derive(Debug, Default)]
pub struct DiagCounters {
    pub bursts_produced: AtomicU64,
    pub bursts_dropped: AtomicU64,
    pub frames_processed: AtomicU64,
    pub windows_completed: AtomicU64,
}

/// Plain-value snapshot of [`DiagCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagSnapshot {
    pub bursts_produced: u64,
    pub bursts_dropped: u64,
    pub frames_processed: u64,
    pub windows_completed: u64,
}

impl DiagCounters {
    #[must_use]
    pub fn snapshot(&self) -> DiagSnapshot {
        DiagSnapshot {
            bursts_produced: self.bursts_produced.load(Ordering::Relaxed),
            bursts_dropped: self.bursts_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
        }
    }
}

/// One burst of interleaved raw samples.
#[derive(Debug, Clone)]
pub struct RawBurst {
    /// Acquisition timestamp in microseconds (monotonic source timebase).
    pub t_us: u64,
    /// Interleaved 12-bit codes, one sample per enabled channel per frame.
    pub samples: Vec<u16>,
}

/// Handle to the acquisition thread. Dropping it requests shutdown and
/// joins the thread.
pub struct Acquisition {
    rx: xch::Receiver<RawBurst>,
    counters: Arc<DiagCounters>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Acquisition {
    /// Spawn the acquisition thread around an ADC source.
    ///
    /// `queue_depth` bounds how many bursts may wait unprocessed; the
    /// processing loop runs every burst, so small depths (4..16) suffice
    /// and keep control latency low.
    pub fn spawn<A>(mut source: A, queue_depth: usize, read_timeout: Duration) -> Self
    where
        A: AdcBurst + Send + 'static,
    {
        let (tx, rx) = xch::bounded::<RawBurst>(queue_depth.max(1));
        let counters = Arc::new(DiagCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_counters = Arc::clone(&counters);
        let thread_shutdown = Arc::clone(&shutdown);
        let join = std::thread::Builder::new()
            .name("adc-acquisition".into())
            .spawn(move || {
                // Capacity hint carried across bursts; the Vec itself is
                // handed off to the consumer, so each burst allocates once.
                let mut cap_hint = 0usize;
                loop {
                    if thread_shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let mut buf: Vec<u16> = Vec::with_capacity(cap_hint);
                    let t_us = match source.read_burst(&mut buf, read_timeout) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::trace!(error = %e, "burst read failed");
                            continue;
                        }
                    };
                    thread_counters.bursts_produced.fetch_add(1, Ordering::Relaxed);
                    cap_hint = buf.len();
                    let burst = RawBurst { t_us, samples: buf };
                    match tx.try_send(burst) {
                        Ok(()) => {}
                        Err(xch::TrySendError::Full(_)) => {
                            thread_counters.bursts_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(xch::TrySendError::Disconnected(_)) => break,
                    }
                }
                tracing::debug!("acquisition thread exiting");
            });
        let join = match join {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn acquisition thread");
                None
            }
        };
        Self {
            rx,
            counters,
            shutdown,
            join,
        }
    }

    /// Receive the next burst, waiting at most `timeout`.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RawBurst> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking receive.
    #[must_use]
    pub fn try_recv(&self) -> Option<RawBurst> {
        self.rx.try_recv().ok()
    }

    #[must_use]
    pub fn counters(&self) -> Arc<DiagCounters> {
        Arc::clone(&self.counters)
    }

    /// Request shutdown and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.join.take() {
            if h.join().is_err() {
                tracing::warn!("acquisition thread panicked");
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}
