#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and sensor calibration parsing for the solar router.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Calibration CSV loader enforces headers and performs a robust refit
//!   to reduce outlier influence before slope/intercept estimation.
use serde::Deserialize;

/// Sensor attached to one ADC channel.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    VoltageAc,
    CurrentGrid,
    CurrentSolar,
    CurrentLoad1,
    CurrentLoad2,
    CurrentLoad3,
    CurrentLoad4,
    CurrentLoad5,
    CurrentLoad6,
    CurrentLoad7,
    CurrentLoad8,
}

impl SensorKind {
    /// Whether two channels carrying this sensor kind may coexist.
    pub fn repeatable(self) -> bool {
        !matches!(
            self,
            SensorKind::VoltageAc | SensorKind::CurrentGrid | SensorKind::CurrentSolar
        )
    }
}

/// One ADC input channel. At most four channels are sampled simultaneously.
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelCfg {
    /// ADC-capable input pin.
    pub pin: u8,
    pub sensor: SensorKind,
    /// Scale factor from centered raw codes to volts/amps.
    pub multiplier: f32,
    /// DC bias in raw codes. Omit to auto-measure at startup.
    #[serde(default)]
    pub offset: Option<f32>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AcquisitionCfg {
    /// Per-channel conversion rate in Hz.
    pub sample_rate_hz: u32,
    /// Burst cadence in milliseconds.
    pub burst_ms: u32,
    /// Bounded queue depth between the acquisition and processing contexts.
    pub queue_depth: usize,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            sample_rate_hz: 20_000,
            burst_ms: 10,
            queue_depth: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurveCfg {
    Linear,
    #[default]
    Rms,
    Logarithmic,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DimmerCfg {
    /// TRIAC gate output pins, one per dimmer channel.
    pub pins: Vec<u8>,
    /// Zero-crossing detector input pin.
    pub zc_pin: u8,
    pub curve: CurveCfg,
    /// Edges closer than this are treated as detector noise.
    pub min_edge_interval_us: u32,
}

impl Default for DimmerCfg {
    fn default() -> Self {
        Self {
            pins: vec![25, 26],
            zc_pin: 27,
            curve: CurveCfg::Rms,
            min_edge_interval_us: 4_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    #[default]
    Off,
    Auto,
    Eco,
    Offgrid,
    Manual,
    Boost,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    /// Proportional divisor: higher gain means smaller, more damped steps.
    pub gain: f32,
    /// Deadband around zero grid power, in watts.
    pub balance_threshold_w: f32,
    /// Deadband for direction classification, in watts.
    pub direction_epsilon_w: f32,
    /// Rated power of the routed load; scales OffGrid solar tracking.
    pub load_nominal_w: f32,
    /// Dimmer channel driven by the control law.
    pub output_channel: usize,
    /// Mode requested at boot. Falls back to off if sensors do not allow it.
    pub startup_mode: StartupMode,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            gain: 200.0,
            balance_threshold_w: 10.0,
            direction_epsilon_w: 2.0,
            load_nominal_w: 2_000.0,
            output_channel: 0,
            startup_mode: StartupMode::Off,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelCfg>,
    #[serde(default)]
    pub acquisition: AcquisitionCfg,
    #[serde(default)]
    pub dimmer: DimmerCfg,
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Channels
        if self.channels.len() > 4 {
            eyre::bail!(
                "at most 4 channels may be configured, got {}",
                self.channels.len()
            );
        }
        for kind in [
            SensorKind::VoltageAc,
            SensorKind::CurrentGrid,
            SensorKind::CurrentSolar,
        ] {
            let n = self
                .channels
                .iter()
                .filter(|c| c.enabled && c.sensor == kind)
                .count();
            if n > 1 {
                eyre::bail!("at most one enabled {kind:?} channel is allowed, got {n}");
            }
        }
        for (i, ch) in self.channels.iter().enumerate() {
            if !ch.multiplier.is_finite() || ch.multiplier == 0.0 {
                eyre::bail!("channel[{i}].multiplier must be finite and non-zero");
            }
            if let Some(off) = ch.offset
                && !(0.0..=4095.0).contains(&off)
            {
                eyre::bail!("channel[{i}].offset must be within the 12-bit code range [0, 4095]");
            }
        }

        // Acquisition
        if self.acquisition.sample_rate_hz == 0 {
            eyre::bail!("acquisition.sample_rate_hz must be > 0");
        }
        if self.acquisition.burst_ms == 0 || self.acquisition.burst_ms > 100 {
            eyre::bail!("acquisition.burst_ms must be in [1, 100]");
        }
        if self.acquisition.queue_depth == 0 {
            eyre::bail!("acquisition.queue_depth must be >= 1");
        }

        // Dimmer
        if self.dimmer.pins.is_empty() {
            eyre::bail!("dimmer.pins must list at least one gate pin");
        }
        if self.dimmer.min_edge_interval_us == 0 {
            eyre::bail!("dimmer.min_edge_interval_us must be >= 1");
        }

        // Control
        if !(10.0..=1000.0).contains(&self.control.gain) {
            eyre::bail!("control.gain must be in [10, 1000]");
        }
        if self.control.balance_threshold_w.is_sign_negative() {
            eyre::bail!("control.balance_threshold_w must be >= 0");
        }
        if self.control.direction_epsilon_w.is_sign_negative() {
            eyre::bail!("control.direction_epsilon_w must be >= 0");
        }
        if !(self.control.load_nominal_w > 0.0) {
            eyre::bail!("control.load_nominal_w must be > 0");
        }
        if self.control.output_channel >= self.dimmer.pins.len() {
            eyre::bail!(
                "control.output_channel {} out of range for {} dimmer pin(s)",
                self.control.output_channel,
                self.dimmer.pins.len()
            );
        }

        Ok(())
    }
}

/// Calibration CSV schema.
///
/// Expected headers:
/// raw,value
///
/// `raw` is the averaged ADC code observed while `value` (amps or volts,
/// depending on the channel) was applied.
///
/// Example:
/// raw,value
/// 1931,0.0
/// 2406,5.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub raw: i64,
    pub value: f32,
}

/// Per-channel linear calibration in the core's form:
/// value = multiplier * (raw - offset)
#[derive(Debug, Clone, Copy)]
pub struct ChannelCalibration {
    pub offset: f32,
    pub multiplier: f32,
}

impl ChannelCalibration {
    /// Fit from calibration rows using ordinary least squares on all points,
    /// then a single robust refit that rejects residuals beyond 2 sigma.
    pub fn from_rows(rows: &[CalibrationRow]) -> eyre::Result<Self> {
        if rows.len() < 2 {
            eyre::bail!("calibration requires at least two rows, got {}", rows.len());
        }
        let pts: Vec<(f64, f64)> = rows
            .iter()
            .map(|r| (r.raw as f64, f64::from(r.value)))
            .collect();

        let (a0, b0) = ols_fit(&pts)?;
        let mut sumsq = 0.0f64;
        for (x, y) in &pts {
            let r = y - (a0 * x + b0);
            sumsq += r * r;
        }
        let rms = (sumsq / pts.len() as f64).sqrt();

        let (a, b) = robust_refit(&pts, a0, b0, rms, 2.0).unwrap_or((a0, b0));

        // Convert to core form: value = a * (raw - offset), offset where value==0.
        let offset = -b / a;
        if !offset.is_finite() {
            eyre::bail!("calibration produced an invalid zero offset");
        }
        Ok(Self {
            offset: offset as f32,
            multiplier: a as f32,
        })
    }
}

fn ols_fit(pts: &[(f64, f64)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x: f64 = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y: f64 = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (x, y) in pts {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("calibration cannot determine slope (degenerate X variance)");
    }
    let a = sxy / sxx;
    if !a.is_finite() || a == 0.0 {
        eyre::bail!("calibration produced a degenerate slope");
    }
    Ok((a, mean_y - a * mean_x))
}

/// Reject points with |residual| > k * rms around the initial line and refit.
/// Returns None when the refit is not applicable (all points are inliers,
/// fewer than two inliers remain, or the variance degenerates); the caller
/// keeps the original fit in that case.
fn robust_refit(pts: &[(f64, f64)], a0: f64, b0: f64, rms: f64, k: f64) -> Option<(f64, f64)> {
    if !(rms.is_finite() && rms > 0.0) {
        return None;
    }
    let thr = k * rms;
    let inliers: Vec<(f64, f64)> = pts
        .iter()
        .copied()
        .filter(|(x, y)| (y - (a0 * x + b0)).abs() <= thr)
        .collect();
    if inliers.len() < 2 || inliers.len() == pts.len() {
        return None;
    }
    ols_fit(&inliers).ok()
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<ChannelCalibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["raw", "value"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'raw,value', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    ChannelCalibration::from_rows(&rows)
}
