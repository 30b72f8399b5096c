//! Raspberry Pi backend (feature `hardware`).
//!
//! The TRIAC gate is pulsed from a dedicated firing thread so the dimmer
//! engine never blocks on pin timing; the zero-crossing input uses rppal's
//! async interrupt. The ADC path drives an MCP3208-class SPI converter,
//! paced burst-by-burst in software.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use router_traits::{AdcBurst, TriacGate};

use crate::error::HwError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Gate pulse width. TRIACs latch well under 50 us; 20 keeps dissipation
/// in the optocoupler low.
const PULSE_US: u64 = 20;

enum GateCmd {
    Fire { delay_us: u32 },
    Off,
}

/// TRIAC gate on a GPIO output, fired from its own thread.
pub struct GpioGate {
    tx: mpsc::Sender<GateCmd>,
    pin_number: u8,
}

impl GpioGate {
    pub fn new(pin: u8) -> Result<Self, HwError> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut out: OutputPin = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output_low();
        let (tx, rx) = mpsc::channel::<GateCmd>();
        std::thread::Builder::new()
            .name(format!("gate-{pin}"))
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        GateCmd::Fire { delay_us } => {
                            std::thread::sleep(Duration::from_micros(u64::from(delay_us)));
                            out.set_high();
                            std::thread::sleep(Duration::from_micros(PULSE_US));
                            out.set_low();
                        }
                        GateCmd::Off => out.set_low(),
                    }
                }
                out.set_low();
            })
            .map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(Self {
            tx,
            pin_number: pin,
        })
    }
}

impl TriacGate for GpioGate {
    fn arm(&mut self, delay_us: u32) -> Result<(), BoxError> {
        self.tx
            .send(GateCmd::Fire { delay_us })
            .map_err(|_| Box::new(HwError::Gpio(format!("gate {} thread gone", self.pin_number))) as BoxError)
    }

    fn disarm(&mut self) -> Result<(), BoxError> {
        self.tx
            .send(GateCmd::Off)
            .map_err(|_| Box::new(HwError::Gpio(format!("gate {} thread gone", self.pin_number))) as BoxError)
    }
}

/// Zero-crossing detector input. Holds the pin alive; edges are delivered
/// to the sink with microseconds since construction.
pub struct ZeroCrossPin {
    _pin: InputPin,
}

impl ZeroCrossPin {
    pub fn new(pin: u8, mut sink: impl FnMut(u64) + Send + 'static) -> Result<Self, HwError> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut input = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_input_pullup();
        let epoch = Instant::now();
        input
            .set_async_interrupt(Trigger::RisingEdge, move |level| {
                if level == Level::High {
                    sink(epoch.elapsed().as_micros() as u64);
                }
            })
            .map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(Self { _pin: input })
    }
}

/// MCP3208-class SPI ADC, read in software-paced bursts.
pub struct SpiAdc {
    spi: Spi,
    channels: Vec<u8>,
    frames_per_burst: u32,
    burst_period: Duration,
    epoch: Instant,
    burst_index: u64,
}

impl SpiAdc {
    pub fn new(channels: Vec<u8>, sample_rate_hz: u32, burst_ms: u32) -> Result<Self, HwError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 2_000_000, Mode::Mode0)
            .map_err(|e| HwError::Adc(e.to_string()))?;
        let frames_per_burst = (sample_rate_hz.max(1) * burst_ms.max(1) / 1_000).max(1);
        Ok(Self {
            spi,
            channels,
            frames_per_burst,
            burst_period: Duration::from_millis(u64::from(burst_ms.max(1))),
            epoch: Instant::now(),
            burst_index: 0,
        })
    }

    fn read_code(&self, channel: u8) -> Result<u16, HwError> {
        let tx = [0b0000_0110 | (channel >> 2), channel << 6, 0];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Adc(e.to_string()))?;
        Ok((u16::from(rx[1] & 0x0F) << 8) | u16::from(rx[2]))
    }
}

impl AdcBurst for SpiAdc {
    fn read_burst(&mut self, buf: &mut Vec<u16>, _timeout: Duration) -> Result<u64, BoxError> {
        let due = self.epoch + self.burst_period * self.burst_index as u32;
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
        let t_us = self.burst_index * self.burst_period.as_micros() as u64;

        buf.reserve(self.frames_per_burst as usize * self.channels.len());
        for _ in 0..self.frames_per_burst {
            for &ch in &self.channels {
                buf.push(self.read_code(ch)?);
            }
        }
        self.burst_index += 1;
        Ok(t_us)
    }
}
