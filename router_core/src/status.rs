//! Public status types for the router controller.

use crate::dimmer::DimmerChannelState;

/// Operating mode of the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterMode {
    /// Output forced to zero; measurements keep running.
    #[default]
    Off,
    /// Closed loop on grid power toward the balance point.
    Auto,
    /// Like Auto, but only ever reduces import; never chases export.
    Eco,
    /// Open loop on solar production against the nominal load.
    OffGrid,
    /// Operator-fixed level.
    Manual,
    /// Pinned to full power.
    Boost,
}

impl std::fmt::Display for RouterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Eco => "eco",
            Self::OffGrid => "offgrid",
            Self::Manual => "manual",
            Self::Boost => "boost",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RouterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            "eco" => Ok(Self::Eco),
            "offgrid" | "off-grid" => Ok(Self::OffGrid),
            "manual" => Ok(Self::Manual),
            "boost" => Ok(Self::Boost),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

impl From<router_config::StartupMode> for RouterMode {
    fn from(m: router_config::StartupMode) -> Self {
        use router_config::StartupMode as S;
        match m {
            S::Off => Self::Off,
            S::Auto => Self::Auto,
            S::Eco => Self::Eco,
            S::Offgrid => Self::OffGrid,
            S::Manual => Self::Manual,
            S::Boost => Self::Boost,
        }
    }
}

/// Direction the control loop moved on its last update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Idle,
    Increasing,
    Decreasing,
    /// Clamped at 100 percent while the loop still asks for more.
    AtMaximum,
    /// Clamped at 0 percent while the loop still asks for less.
    AtMinimum,
    /// A sensor the active mode depends on went missing or invalid.
    Error,
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::AtMaximum => "at-maximum",
            Self::AtMinimum => "at-minimum",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the controller and dimmer, built on demand.
#[derive(Debug, Clone, Default)]
pub struct RouterStatus {
    pub mode: RouterMode,
    pub state: ControlState,
    /// Internal control target with sub-percent resolution.
    pub target_level: f32,
    /// Signed grid power from the last window, watts.
    pub grid_power_w: Option<f32>,
    /// Signed solar power from the last window, watts.
    pub solar_power_w: Option<f32>,
    /// Total routed-load power from the last window, watts.
    pub load_power_w: Option<f32>,
    /// Active proportional divisor.
    pub control_gain: f32,
    /// Active grid-power deadband, watts.
    pub balance_threshold_w: f32,
    pub mains_hz: f32,
    /// True when the last window completed with full integrity.
    pub valid: bool,
    /// Timestamp of the last processed window, milliseconds.
    pub last_update_ms: u64,
    pub channels: Vec<DimmerChannelState>,
}
