//! Hardware backends for the router's trait seams.
//!
//! The default build ships only the software simulator, so the whole
//! workspace compiles and tests on any host. The `hardware` feature adds
//! the Raspberry Pi GPIO/SPI backend.

#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![warn(clippy::pedantic, clippy::nursery)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

pub use error::HwError;
pub use sim::{SimChannel, SimGate, SimMainsAdc};

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use gpio::{GpioGate, SpiAdc, ZeroCrossPin};
