//! Control core of a solar-energy router.
//!
//! The pipeline runs in three stages:
//! 1. acquisition: a background thread pulls interleaved ADC bursts and
//!    queues them without ever blocking on the consumer;
//! 2. metrology: bursts are folded into 200 ms RMS/active-power windows,
//!    published by copy as [`Measurements`] snapshots;
//! 3. control: each window drives one step of the [`RouterController`],
//!    which steers the phase-cut [`DimmerEngine`] so surplus solar power
//!    lands in the routed load instead of the grid.
//!
//! Hardware enters through two traits ([`router_traits::AdcBurst`] and
//! [`router_traits::TriacGate`]) plus the shared [`ZeroCrossClock`] fed by
//! the mains edge source; everything here is host-testable.

#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![warn(clippy::pedantic, clippy::nursery)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

pub mod acquisition;
pub mod channel;
pub mod controller;
pub mod dimmer;
pub mod error;
pub mod measure;
pub mod metrology;
pub mod mocks;
pub mod runner;
pub mod status;
pub mod util;
pub mod zerocross;

pub use acquisition::{Acquisition, DiagCounters, DiagSnapshot, RawBurst};
pub use channel::{ChannelConfig, SensorKind, SensorMap};
pub use controller::{
    mode_requirement, validate_mode, ControlSettings, RouterController, GAIN_MAX, GAIN_MIN,
};
pub use dimmer::{
    conducted_power_fraction, DimmerChannelState, DimmerCurve, DimmerEngine, DEFAULT_RAMP_MS,
    MAX_RAMP_MS,
};
pub use error::{BeginError, Result, RouterError};
pub use measure::{Measurements, PhaseSign, PowerDirection, WindowQuality, MAX_CHANNELS};
pub use metrology::MetrologyEngine;
pub use runner::{spawn, Diagnostics, Router, RouterHandle, RunParams};
pub use status::{ControlState, RouterMode, RouterStatus};
pub use zerocross::{HalfCycle, ZeroCrossClock, NOMINAL_HALF_CYCLE_US};
