//! Channel descriptors and sensor role mapping.
//!
//! The acquisition layer delivers interleaved frames with one sample per
//! configured channel. Which channel plays which electrical role (mains
//! voltage, grid current, solar current, a routed load's current) is fixed
//! at startup from configuration and captured in a [`SensorMap`].

use crate::error::RouterError;
use crate::measure::MAX_CHANNELS;

/// Electrical role of an analog input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Mains voltage, via a step-down/divider front end.
    VoltageAc,
    /// Current at the grid connection point (signed via phase correlation).
    CurrentGrid,
    /// Current on the solar production feed.
    CurrentSolar,
    /// Current through a routed load; `0` is the first routed load.
    CurrentLoad(u8),
}

impl SensorKind {
    /// Roles that may legally appear on more than one enabled channel.
    #[must_use]
    pub const fn repeatable(self) -> bool {
        matches!(self, Self::CurrentLoad(_))
    }
}

impl From<router_config::SensorKind> for SensorKind {
    fn from(k: router_config::SensorKind) -> Self {
        use router_config::SensorKind as K;
        match k {
            K::VoltageAc => Self::VoltageAc,
            K::CurrentGrid => Self::CurrentGrid,
            K::CurrentSolar => Self::CurrentSolar,
            K::CurrentLoad1 => Self::CurrentLoad(0),
            K::CurrentLoad2 => Self::CurrentLoad(1),
            K::CurrentLoad3 => Self::CurrentLoad(2),
            K::CurrentLoad4 => Self::CurrentLoad(3),
            K::CurrentLoad5 => Self::CurrentLoad(4),
            K::CurrentLoad6 => Self::CurrentLoad(5),
            K::CurrentLoad7 => Self::CurrentLoad(6),
            K::CurrentLoad8 => Self::CurrentLoad(7),
        }
    }
}

/// Runtime description of one analog input channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub sensor: SensorKind,
    /// Scale from centered ADC codes to engineering units (V or A per code).
    pub multiplier: f32,
    /// Mid-scale offset in raw codes. `None` requests auto-measurement
    /// during the first (settling) window.
    pub offset: Option<f32>,
}

impl From<&router_config::ChannelCfg> for ChannelConfig {
    fn from(c: &router_config::ChannelCfg) -> Self {
        Self {
            sensor: c.sensor.into(),
            multiplier: c.multiplier,
            offset: c.offset,
        }
    }
}

/// Index of each sensor role inside the interleaved frame.
#[derive(Debug, Clone, Default)]
pub struct SensorMap {
    pub voltage: Option<usize>,
    pub grid: Option<usize>,
    pub solar: Option<usize>,
    pub loads: Vec<usize>,
}

impl SensorMap {
    /// Build the role map from the ordered channel list.
    ///
    /// Fails when more channels than the acquisition engine supports are
    /// given, or when a non-repeatable role appears twice.
    pub fn build(channels: &[ChannelConfig]) -> std::result::Result<Self, RouterError> {
        if channels.is_empty() {
            return Err(RouterError::Config("no channels configured".into()));
        }
        if channels.len() > MAX_CHANNELS {
            return Err(RouterError::Config(format!(
                "{} channels configured, at most {MAX_CHANNELS} supported",
                channels.len()
            )));
        }
        let mut map = Self::default();
        for (idx, ch) in channels.iter().enumerate() {
            let slot = match ch.sensor {
                SensorKind::VoltageAc => &mut map.voltage,
                SensorKind::CurrentGrid => &mut map.grid,
                SensorKind::CurrentSolar => &mut map.solar,
                SensorKind::CurrentLoad(_) => {
                    map.loads.push(idx);
                    continue;
                }
            };
            if slot.replace(idx).is_some() {
                return Err(RouterError::Config(format!(
                    "sensor role {:?} assigned to more than one channel",
                    ch.sensor
                )));
            }
        }
        Ok(map)
    }

    #[must_use]
    pub const fn has_voltage(&self) -> bool {
        self.voltage.is_some()
    }

    #[must_use]
    pub const fn has_grid(&self) -> bool {
        self.grid.is_some()
    }

    #[must_use]
    pub const fn has_solar(&self) -> bool {
        self.solar.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(sensor: SensorKind) -> ChannelConfig {
        ChannelConfig {
            sensor,
            multiplier: 1.0,
            offset: Some(2048.0),
        }
    }

    #[test]
    fn maps_roles_to_frame_positions() {
        let map = SensorMap::build(&[
            ch(SensorKind::VoltageAc),
            ch(SensorKind::CurrentGrid),
            ch(SensorKind::CurrentLoad(0)),
        ])
        .unwrap();
        assert_eq!(map.voltage, Some(0));
        assert_eq!(map.grid, Some(1));
        assert_eq!(map.loads, vec![2]);
        assert!(map.solar.is_none());
    }

    #[test]
    fn rejects_duplicate_voltage_role() {
        let err = SensorMap::build(&[ch(SensorKind::VoltageAc), ch(SensorKind::VoltageAc)])
            .unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn allows_multiple_load_channels() {
        let map = SensorMap::build(&[
            ch(SensorKind::CurrentLoad(0)),
            ch(SensorKind::CurrentLoad(1)),
        ])
        .unwrap();
        assert_eq!(map.loads, vec![0, 1]);
    }

    #[test]
    fn rejects_too_many_channels() {
        let channels = vec![ch(SensorKind::CurrentLoad(0)); MAX_CHANNELS + 1];
        assert!(SensorMap::build(&channels).is_err());
    }
}
