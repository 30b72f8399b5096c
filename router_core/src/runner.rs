//! Pipeline wiring and the processing loop.
//!
//! [`spawn`] assembles acquisition, metrology, dimmer and controller into a
//! running router and returns a [`Router`] owning the processing thread,
//! plus a cloneable [`RouterHandle`] for the command surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use eyre::WrapErr;
use router_traits::{AdcBurst, Clock, TriacGate};

use crate::acquisition::{Acquisition, DiagCounters, DiagSnapshot};
use crate::channel::{ChannelConfig, SensorMap};
use crate::controller::{ControlSettings, RouterController};
use crate::dimmer::{DimmerCurve, DimmerEngine};
use crate::error::{Result, RouterError};
use crate::metrology::MetrologyEngine;
use crate::status::{RouterMode, RouterStatus};
use crate::zerocross::ZeroCrossClock;

/// How long the processing loop waits for a burst before checking for
/// shutdown and pending zero-cross edges anyway.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Everything needed to assemble a router pipeline.
#[derive(Clone)]
pub struct RunParams {
    pub channels: Vec<ChannelConfig>,
    pub sample_rate_hz: u32,
    pub queue_depth: usize,
    pub burst_timeout: Duration,
    pub direction_epsilon_w: f32,
    pub control: ControlSettings,
    pub curve: DimmerCurve,
    pub startup_mode: RouterMode,
}

impl RunParams {
    /// Derive run parameters from a validated configuration.
    #[must_use]
    pub fn from_config(cfg: &router_config::Config) -> Self {
        let channels = cfg
            .channels
            .iter()
            .filter(|c| c.enabled)
            .map(ChannelConfig::from)
            .collect();
        Self {
            channels,
            sample_rate_hz: cfg.acquisition.sample_rate_hz,
            queue_depth: cfg.acquisition.queue_depth,
            burst_timeout: Duration::from_millis(u64::from(cfg.acquisition.burst_ms) * 5),
            direction_epsilon_w: cfg.control.direction_epsilon_w,
            control: ControlSettings::from(&cfg.control),
            curve: DimmerCurve::from(cfg.dimmer.curve),
            startup_mode: RouterMode::from(cfg.control.startup_mode),
        }
    }
}

/// Counter snapshot plus live frequency, for operator diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    pub counters: DiagSnapshot,
    pub mains_hz: f32,
    pub zero_cross_edges: u64,
}

/// Cloneable command surface over the running pipeline.
#[derive(Clone)]
pub struct RouterHandle {
    controller: Arc<Mutex<RouterController>>,
    counters: Arc<DiagCounters>,
    zero_cross: Arc<ZeroCrossClock>,
}

impl RouterHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, RouterController> {
        // Keep serving commands even if a panic poisoned the lock; the
        // emergency path in particular must stay reachable.
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: RouterMode) -> std::result::Result<(), RouterError> {
        self.lock().set_mode(mode)
    }

    pub fn set_manual_level(&self, percent: u8) {
        self.lock().set_manual_level(percent);
    }

    pub fn set_control_gain(&self, gain: f32) -> std::result::Result<(), RouterError> {
        self.lock().set_control_gain(gain)
    }

    pub fn set_balance_threshold(&self, watts: f32) -> std::result::Result<(), RouterError> {
        self.lock().set_balance_threshold(watts)
    }

    /// Direct dimmer channel command, bypassing the control loop. On the
    /// loop's own output channel the next window overrides it.
    pub fn set_channel_power(
        &self,
        channel: usize,
        percent: u8,
    ) -> std::result::Result<(), RouterError> {
        self.lock().dimmer_mut().set_power(channel, percent)
    }

    pub fn set_channel_power_smooth(
        &self,
        channel: usize,
        percent: u8,
        duration_ms: Option<u32>,
    ) -> std::result::Result<(), RouterError> {
        self.lock()
            .dimmer_mut()
            .set_power_smooth(channel, percent, duration_ms)
    }

    pub fn set_channel_curve(
        &self,
        channel: usize,
        curve: DimmerCurve,
    ) -> std::result::Result<(), RouterError> {
        self.lock().dimmer_mut().set_curve(channel, curve)
    }

    #[must_use]
    pub fn get_channel_power(&self, channel: usize) -> u8 {
        self.lock().dimmer().get_power(channel)
    }

    pub fn emergency_stop(&self) {
        self.lock().emergency_stop();
    }

    #[must_use]
    pub fn status(&self) -> RouterStatus {
        self.lock().status()
    }

    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            counters: self.counters.snapshot(),
            mains_hz: self.zero_cross.frequency_hz(),
            zero_cross_edges: self.zero_cross.edges_seen(),
        }
    }
}

/// A running router pipeline. Stopping (or dropping) drives every output
/// off and joins the processing thread.
pub struct Router {
    handle: RouterHandle,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Router {
    #[must_use]
    pub fn handle(&self) -> RouterHandle {
        self.handle.clone()
    }

    /// Request shutdown and join the processing thread. The shutdown path
    /// always forces the dimmer off.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.join.take() {
            if h.join().is_err() {
                tracing::warn!("processing thread panicked");
                // The thread died before its own shutdown path could run.
                self.handle.emergency_stop();
            }
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Assemble and start the full pipeline.
///
/// `zero_cross` is shared with the edge source (hardware ISR thread or the
/// simulator) which feeds it; this side only consumes edges.
pub fn spawn<A>(
    adc: A,
    gates: Vec<(u8, Box<dyn TriacGate + Send>)>,
    zero_cross: Arc<ZeroCrossClock>,
    params: RunParams,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<Router>
where
    A: AdcBurst + Send + 'static,
{
    let sensors = SensorMap::build(&params.channels).wrap_err("invalid channel layout")?;

    let acquisition = Acquisition::spawn(adc, params.queue_depth, params.burst_timeout);
    let counters = acquisition.counters();

    let mut metrology = MetrologyEngine::new(
        &params.channels,
        params.sample_rate_hz,
        params.direction_epsilon_w,
        Arc::clone(&counters),
    )
    .wrap_err("metrology setup failed")?;

    let dimmer = DimmerEngine::new(Arc::clone(&zero_cross), gates, clock);
    let mut controller = RouterController::new(dimmer, sensors, params.control);
    controller
        .begin(params.curve)
        .wrap_err("dimmer initialization failed")?;
    if let Err(e) = controller.set_mode(params.startup_mode) {
        tracing::warn!(error = %e, "startup mode rejected, staying off");
    }

    let controller = Arc::new(Mutex::new(controller));
    let cb_controller = Arc::clone(&controller);
    metrology.set_results_callback(move |m| {
        let mut c = cb_controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        c.update(m);
    });

    let handle = RouterHandle {
        controller: Arc::clone(&controller),
        counters,
        zero_cross: Arc::clone(&zero_cross),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);
    let thread_controller = Arc::clone(&controller);
    let thread_zc = Arc::clone(&zero_cross);

    let join = std::thread::Builder::new()
        .name("router-process".into())
        .spawn(move || {
            // The Acquisition handle moves in here so its thread stops with
            // this one.
            let acquisition = acquisition;
            let mut edges_dispatched = 0u64;
            loop {
                if thread_shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let burst = acquisition.recv_timeout(IDLE_POLL);

                let edges = thread_zc.edges_seen();
                if edges != edges_dispatched {
                    edges_dispatched = edges;
                    thread_controller
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .on_zero_cross();
                }

                if let Some(b) = burst {
                    metrology.process_burst(&b);
                }
            }
            thread_controller
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .emergency_stop();
            tracing::debug!("processing thread exiting");
        })
        .wrap_err("failed to spawn processing thread")?;

    Ok(Router {
        handle,
        shutdown,
        join: Some(join),
    })
}
