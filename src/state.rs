//! Externally visible climate state derived from a parameter snapshot.

use crate::config::DeviceConfig;
use crate::engine::Capabilities;
use crate::params::{Param, Snapshot};
use serde::Serialize;

/// Lowest settable target temperature (°C).
pub const MIN_TEMP: i64 = 16;
/// Highest settable target temperature (°C).
pub const MAX_TEMP: i64 = 30;
/// Built-in sensor readings above this value are offset by it.
pub const TEMP_OFFSET: i64 = 40;
/// Target shown while 8 °C heating is active.
pub const EIGHT_DEGREE_TARGET: i64 = 8;

define_mode! {
    /// Operating mode, indexed by `Mod`. `Off` is reported when `Pow` is 0.
    HvacMode {
        Auto = "auto",
        Cool = "cool",
        Dry = "dry",
        FanOnly = "fan_only",
        Heat = "heat",
        Off = "off",
    }
}

define_mode! {
    /// Fan speed, indexed by `WdSpd`. Turbo and Quiet come from their own flags.
    FanMode {
        Auto = "Auto",
        Low = "Low",
        MediumLow = "Medium-Low",
        Medium = "Medium",
        MediumHigh = "Medium-High",
        High = "High",
        Turbo = "Turbo",
        Quiet = "Quiet",
    }
}

define_mode! {
    /// Vertical louver setting, indexed by `SwUpDn`.
    SwingMode {
        Default = "Default",
        FullSwing = "Swing in full range",
        FixedUpmost = "Fixed in the upmost position",
        FixedMiddleUp = "Fixed in the middle-up position",
        FixedMiddle = "Fixed in the middle position",
        FixedMiddleLow = "Fixed in the middle-low position",
        FixedLowest = "Fixed in the lowest position",
        SwingDownmost = "Swing in the downmost region",
        SwingMiddleLow = "Swing in the middle-low region",
        SwingMiddle = "Swing in the middle region",
        SwingMiddleUp = "Swing in the middle-up region",
        SwingUpmost = "Swing in the upmost region",
    }
}

define_mode! {
    /// Horizontal louver setting, indexed by `SwingLfRig`.
    PresetMode {
        Default = "Default",
        FullSwing = "Full swing",
        FixedLeftmost = "Fixed in the leftmost position",
        FixedMiddleLeft = "Fixed in the middle-left position",
        // Label matches the one shipped to users, typo included.
        FixedMiddle = "Fixed in the middle postion",
        FixedMiddleRight = "Fixed in the middle-right position",
        FixedRightmost = "Fixed in the rightmost position",
    }
}

/// On/off feature as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    Off,
    #[default]
    Unknown,
}

impl Switch {
    /// 1 is on, 0 is off, anything else (or nothing) is unknown.
    pub fn from_value(value: Option<i64>) -> Self {
        match value {
            Some(1) => Switch::On,
            Some(0) => Switch::Off,
            _ => Switch::Unknown,
        }
    }

    pub fn is_on(&self) -> bool {
        *self == Switch::On
    }
}

/// Reconciled view of one appliance, published after every successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClimateState {
    pub available: bool,
    pub hvac_mode: Option<HvacMode>,
    pub target_temperature: Option<i64>,
    pub current_temperature: Option<f64>,
    pub fan_mode: Option<FanMode>,
    pub swing_mode: Option<SwingMode>,
    pub preset_mode: Option<PresetMode>,
    pub lights: Switch,
    pub xfan: Switch,
    pub health: Switch,
    pub powersave: Switch,
    pub sleep: Switch,
    pub eight_degree_heat: Switch,
    pub air: Switch,
    pub anti_direct_blow: Option<Switch>,
    /// `LigSen` 0 means the display follows ambient light.
    pub light_sensor: Option<Switch>,
}

impl ClimateState {
    pub fn derive(
        snapshot: &Snapshot,
        caps: &Capabilities,
        config: &DeviceConfig,
        external_temperature: Option<f64>,
        available: bool,
    ) -> Self {
        let get = |p: Param| snapshot.get(p);

        let sleep = match (get(Param::SleepSwitch), get(Param::SleepMode)) {
            (Some(1), Some(1)) => Switch::On,
            (Some(0), Some(0)) => Switch::Off,
            _ => Switch::Unknown,
        };

        let light_sensor = caps.light_sensor.is_present().then(|| {
            match get(Param::LightSensor) {
                Some(0) => Switch::On,
                Some(1) => Switch::Off,
                _ => Switch::Unknown,
            }
        });

        Self {
            available,
            hvac_mode: hvac_mode(snapshot),
            target_temperature: target_temperature(snapshot),
            current_temperature: external_temperature
                .or_else(|| builtin_temperature(snapshot, caps)),
            fan_mode: fan_mode(snapshot),
            swing_mode: get(Param::SwingVertical).and_then(SwingMode::from_index),
            preset_mode: if config.horizontal_swing {
                get(Param::SwingHorizontal).and_then(PresetMode::from_index)
            } else {
                None
            },
            lights: Switch::from_value(get(Param::Light)),
            xfan: Switch::from_value(get(Param::XFan)),
            health: Switch::from_value(get(Param::Health)),
            powersave: Switch::from_value(get(Param::PowerSave)),
            sleep,
            eight_degree_heat: Switch::from_value(get(Param::EightDegreeHeat)),
            air: Switch::from_value(get(Param::Air)),
            anti_direct_blow: caps
                .anti_direct_blow
                .is_present()
                .then(|| Switch::from_value(get(Param::AntiDirectBlow))),
            light_sensor,
        }
    }

    /// True when the device reports power on.
    pub fn is_powered(&self) -> bool {
        matches!(self.hvac_mode, Some(m) if m != HvacMode::Off)
    }
}

fn hvac_mode(snapshot: &Snapshot) -> Option<HvacMode> {
    match snapshot.get(Param::Power)? {
        0 => Some(HvacMode::Off),
        _ => snapshot.get(Param::Mode).and_then(HvacMode::from_index),
    }
}

fn target_temperature(snapshot: &Snapshot) -> Option<i64> {
    if snapshot.get(Param::EightDegreeHeat) == Some(1) {
        Some(EIGHT_DEGREE_TARGET)
    } else {
        snapshot.get(Param::SetTemperature)
    }
}

fn fan_mode(snapshot: &Snapshot) -> Option<FanMode> {
    if snapshot.get(Param::Turbo) == Some(1) {
        Some(FanMode::Turbo)
    } else if snapshot.get(Param::Quiet).is_some_and(|q| q >= 1) {
        Some(FanMode::Quiet)
    } else {
        snapshot.get(Param::FanSpeed).and_then(FanMode::from_index)
    }
}

/// Built-in sensor reading in °C. Raw values above the offset are offset-encoded.
fn builtin_temperature(snapshot: &Snapshot, caps: &Capabilities) -> Option<f64> {
    if !caps.temperature_sensor.is_present() {
        return None;
    }
    let raw = snapshot.get(Param::BuiltInTemperature)?;
    let celsius = if raw > TEMP_OFFSET { raw - TEMP_OFFSET } else { raw };
    Some(celsius as f64)
}
