//! User intents and their translation into override sets.

use crate::config::DeviceConfig;
use crate::engine::Capabilities;
use crate::error::{GreeError, Result};
use crate::params::{Overrides, Param};
use crate::state::{ClimateState, FanMode, HvacMode, MAX_TEMP, MIN_TEMP, PresetMode, SwingMode};
use log::debug;

/// Toggleable device feature addressed by [`Command::SetSwitch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Lights,
    XFan,
    Health,
    PowerSave,
    Sleep,
    EightDegreeHeat,
    Air,
    AntiDirectBlow,
    LightSensor,
}

/// Client-side behaviour layered on top of the device's own settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Automation {
    /// Display light follows power.
    pub auto_light: bool,
    /// X-Fan is switched on when entering Cool or Dry.
    pub auto_xfan: bool,
    /// Hand the display light to the built-in light sensor while powered.
    pub light_sensor_enabled: bool,
}

impl Automation {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            auto_light: config.auto_light,
            auto_xfan: config.auto_xfan,
            light_sensor_enabled: config.light_sensor,
        }
    }
}

/// A request to change the appliance.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TurnOn,
    TurnOff,
    SetHvacMode(HvacMode),
    SetTemperature(i64),
    SetFanMode(FanMode),
    SetSwingMode(SwingMode),
    SetPresetMode(PresetMode),
    SetSwitch(Feature, bool),
    SetAutoLight(bool),
    SetAutoXfan(bool),
    SetLightSensorEnabled(bool),
}

impl Command {
    /// Build the override set for this command against the current state.
    ///
    /// May update `automation`. An empty result means nothing needs sending.
    /// Guard violations return [`GreeError::Rejected`] and leave `automation` untouched.
    pub fn overrides(
        &self,
        state: &ClimateState,
        caps: &Capabilities,
        automation: &mut Automation,
    ) -> Result<Overrides> {
        let mut o = Overrides::new();
        let light_sensor_active = caps.light_sensor.is_present() && automation.light_sensor_enabled;

        match *self {
            Command::TurnOn => power_on(&mut o, automation, light_sensor_active),
            Command::TurnOff => power_off(&mut o, automation, light_sensor_active),
            Command::SetHvacMode(HvacMode::Off) => power_off(&mut o, automation, light_sensor_active),
            Command::SetHvacMode(mode) => {
                o.set(Param::Power, 1).set(Param::Mode, mode.index());
                if automation.auto_light {
                    o.set(Param::Light, 1);
                    if light_sensor_active {
                        o.set(Param::LightSensor, 0);
                    }
                }
                if automation.auto_xfan && matches!(mode, HvacMode::Cool | HvacMode::Dry) {
                    o.set(Param::XFan, 1);
                }
            }
            Command::SetTemperature(t) => {
                require_power(state, "set temperature")?;
                if !(MIN_TEMP..=MAX_TEMP).contains(&t) {
                    return Err(GreeError::Rejected(format!(
                        "temperature {} outside {}..={}",
                        t, MIN_TEMP, MAX_TEMP
                    )));
                }
                o.set(Param::SetTemperature, t);
            }
            Command::SetFanMode(fan) => {
                require_power(state, "set fan mode")?;
                match fan {
                    FanMode::Turbo => o.set(Param::Turbo, 1).set(Param::Quiet, 0),
                    FanMode::Quiet => o.set(Param::Turbo, 0).set(Param::Quiet, 1),
                    other => o
                        .set(Param::FanSpeed, other.index())
                        .set(Param::Turbo, 0)
                        .set(Param::Quiet, 0),
                };
            }
            Command::SetSwingMode(swing) => {
                require_power(state, "set swing mode")?;
                o.set(Param::SwingVertical, swing.index());
            }
            Command::SetPresetMode(preset) => {
                require_power(state, "set preset mode")?;
                o.set(Param::SwingHorizontal, preset.index());
            }
            Command::SetSwitch(Feature::LightSensor, on) => {
                return Command::SetLightSensorEnabled(on).overrides(state, caps, automation);
            }
            Command::SetSwitch(feature, on) => switch(&mut o, feature, on, state, caps)?,
            Command::SetAutoLight(on) => {
                automation.auto_light = on;
                if on {
                    o.set(Param::Light, i64::from(state.is_powered()));
                }
            }
            Command::SetAutoXfan(on) => {
                automation.auto_xfan = on;
                if !on {
                    o.set(Param::XFan, 0);
                }
            }
            Command::SetLightSensorEnabled(on) => {
                automation.light_sensor_enabled = on;
                if on && caps.light_sensor.is_present() && state.is_powered() {
                    o.set(Param::Light, 1).set(Param::LightSensor, 0);
                }
            }
        }

        debug!("{:?} -> {:?}", self, o);
        Ok(o)
    }
}

fn power_on(o: &mut Overrides, automation: &Automation, light_sensor_active: bool) {
    o.set(Param::Power, 1);
    if automation.auto_light {
        o.set(Param::Light, 1);
        if light_sensor_active {
            o.set(Param::LightSensor, 0);
        }
    }
}

fn power_off(o: &mut Overrides, automation: &Automation, light_sensor_active: bool) {
    o.set(Param::Power, 0);
    if automation.auto_light {
        o.set(Param::Light, 0);
        if light_sensor_active {
            o.set(Param::LightSensor, 1);
        }
    }
}

fn require_power(state: &ClimateState, action: &str) -> Result<()> {
    if state.is_powered() {
        Ok(())
    } else {
        Err(GreeError::Rejected(format!("cannot {} while powered off", action)))
    }
}

fn require_mode(state: &ClimateState, feature: Feature, allowed: &[HvacMode]) -> Result<()> {
    match state.hvac_mode {
        Some(mode) if allowed.contains(&mode) => Ok(()),
        mode => Err(GreeError::Rejected(format!(
            "cannot set {:?} in {:?} mode",
            feature, mode
        ))),
    }
}

fn switch(
    o: &mut Overrides,
    feature: Feature,
    on: bool,
    state: &ClimateState,
    caps: &Capabilities,
) -> Result<()> {
    let v = i64::from(on);
    match feature {
        Feature::Lights => {
            o.set(Param::Light, v);
        }
        Feature::Health => {
            o.set(Param::Health, v);
        }
        Feature::Air => {
            o.set(Param::Air, v);
        }
        Feature::XFan => {
            require_mode(state, feature, &[HvacMode::Cool, HvacMode::Dry])?;
            o.set(Param::XFan, v);
        }
        Feature::PowerSave => {
            require_mode(state, feature, &[HvacMode::Cool])?;
            o.set(Param::PowerSave, v);
        }
        Feature::Sleep => {
            require_mode(state, feature, &[HvacMode::Cool, HvacMode::Heat])?;
            o.set(Param::SleepSwitch, v).set(Param::SleepMode, v);
        }
        Feature::EightDegreeHeat => {
            require_mode(state, feature, &[HvacMode::Heat])?;
            o.set(Param::EightDegreeHeat, v);
        }
        Feature::AntiDirectBlow => {
            if !caps.anti_direct_blow.is_present() {
                return Err(GreeError::Rejected("device has no anti direct blow".into()));
            }
            o.set(Param::AntiDirectBlow, v);
        }
        Feature::LightSensor => {
            return Err(GreeError::Rejected(
                "light sensor is handled by SetLightSensorEnabled".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProbeOutcome;

    fn state(mode: HvacMode) -> ClimateState {
        ClimateState {
            hvac_mode: Some(mode),
            available: true,
            ..ClimateState::default()
        }
    }

    fn with_light_sensor() -> Capabilities {
        Capabilities {
            light_sensor: ProbeOutcome::Present,
            ..Capabilities::default()
        }
    }

    fn run(cmd: Command, st: &ClimateState) -> Result<Overrides> {
        cmd.overrides(st, &Capabilities::default(), &mut Automation::default())
    }

    #[test]
    fn turn_on_with_auto_light_and_sensor() {
        let mut auto = Automation {
            auto_light: true,
            light_sensor_enabled: true,
            ..Automation::default()
        };
        let o = Command::TurnOn
            .overrides(&state(HvacMode::Off), &with_light_sensor(), &mut auto)
            .unwrap();
        assert_eq!(
            o,
            Overrides::from([(Param::Power, 1), (Param::Light, 1), (Param::LightSensor, 0)])
        );

        let o = Command::TurnOff
            .overrides(&state(HvacMode::Cool), &with_light_sensor(), &mut auto)
            .unwrap();
        assert_eq!(
            o,
            Overrides::from([(Param::Power, 0), (Param::Light, 0), (Param::LightSensor, 1)])
        );
    }

    #[test]
    fn plain_power_toggle() {
        let o = run(Command::TurnOn, &state(HvacMode::Off)).unwrap();
        assert_eq!(o, Overrides::from([(Param::Power, 1)]));
        let o = run(Command::SetHvacMode(HvacMode::Off), &state(HvacMode::Heat)).unwrap();
        assert_eq!(o, Overrides::from([(Param::Power, 0)]));
    }

    #[test]
    fn hvac_mode_with_auto_xfan() {
        let mut auto = Automation {
            auto_xfan: true,
            ..Automation::default()
        };
        let caps = Capabilities::default();
        let o = Command::SetHvacMode(HvacMode::Dry)
            .overrides(&state(HvacMode::Off), &caps, &mut auto)
            .unwrap();
        assert_eq!(
            o,
            Overrides::from([(Param::Power, 1), (Param::Mode, 2), (Param::XFan, 1)])
        );

        let o = Command::SetHvacMode(HvacMode::Heat)
            .overrides(&state(HvacMode::Off), &caps, &mut auto)
            .unwrap();
        assert_eq!(o, Overrides::from([(Param::Power, 1), (Param::Mode, 4)]));
    }

    #[test]
    fn temperature_guards() {
        let o = run(Command::SetTemperature(24), &state(HvacMode::Cool)).unwrap();
        assert_eq!(o, Overrides::from([(Param::SetTemperature, 24)]));
        assert!(matches!(
            run(Command::SetTemperature(24), &state(HvacMode::Off)),
            Err(GreeError::Rejected(_))
        ));
        assert!(run(Command::SetTemperature(31), &state(HvacMode::Cool)).is_err());
        assert!(run(Command::SetTemperature(15), &state(HvacMode::Cool)).is_err());
    }

    #[test]
    fn fan_mode_flags() {
        let cool = state(HvacMode::Cool);
        assert_eq!(
            run(Command::SetFanMode(FanMode::Turbo), &cool).unwrap(),
            Overrides::from([(Param::Turbo, 1), (Param::Quiet, 0)])
        );
        assert_eq!(
            run(Command::SetFanMode(FanMode::Quiet), &cool).unwrap(),
            Overrides::from([(Param::Turbo, 0), (Param::Quiet, 1)])
        );
        assert_eq!(
            run(Command::SetFanMode(FanMode::High), &cool).unwrap(),
            Overrides::from([(Param::FanSpeed, 5), (Param::Turbo, 0), (Param::Quiet, 0)])
        );
        assert!(run(Command::SetFanMode(FanMode::High), &state(HvacMode::Off)).is_err());
    }

    #[test]
    fn louvers_need_power() {
        let cool = state(HvacMode::Cool);
        assert_eq!(
            run(Command::SetSwingMode(SwingMode::FixedMiddle), &cool).unwrap(),
            Overrides::from([(Param::SwingVertical, 4)])
        );
        assert_eq!(
            run(Command::SetPresetMode(PresetMode::FullSwing), &cool).unwrap(),
            Overrides::from([(Param::SwingHorizontal, 1)])
        );
        assert!(run(Command::SetSwingMode(SwingMode::Default), &state(HvacMode::Off)).is_err());
    }

    #[test]
    fn mode_restricted_switches() {
        assert!(run(Command::SetSwitch(Feature::XFan, true), &state(HvacMode::Heat)).is_err());
        assert!(run(Command::SetSwitch(Feature::XFan, true), &state(HvacMode::Dry)).is_ok());
        assert!(run(Command::SetSwitch(Feature::PowerSave, true), &state(HvacMode::Dry)).is_err());
        assert!(run(Command::SetSwitch(Feature::EightDegreeHeat, true), &state(HvacMode::Cool)).is_err());
        assert_eq!(
            run(Command::SetSwitch(Feature::Sleep, true), &state(HvacMode::Heat)).unwrap(),
            Overrides::from([(Param::SleepSwitch, 1), (Param::SleepMode, 1)])
        );
        assert!(run(Command::SetSwitch(Feature::Sleep, true), &state(HvacMode::Auto)).is_err());
        assert_eq!(
            run(Command::SetSwitch(Feature::Health, false), &state(HvacMode::Off)).unwrap(),
            Overrides::from([(Param::Health, 0)])
        );
    }

    #[test]
    fn anti_direct_blow_requires_capability() {
        assert!(run(Command::SetSwitch(Feature::AntiDirectBlow, true), &state(HvacMode::Cool)).is_err());
        let caps = Capabilities {
            anti_direct_blow: ProbeOutcome::Present,
            ..Capabilities::default()
        };
        let o = Command::SetSwitch(Feature::AntiDirectBlow, true)
            .overrides(&state(HvacMode::Cool), &caps, &mut Automation::default())
            .unwrap();
        assert_eq!(o, Overrides::from([(Param::AntiDirectBlow, 1)]));
    }

    #[test]
    fn automation_toggles() {
        let mut auto = Automation::default();
        let caps = with_light_sensor();
        let o = Command::SetAutoLight(true)
            .overrides(&state(HvacMode::Cool), &caps, &mut auto)
            .unwrap();
        assert!(auto.auto_light);
        assert_eq!(o, Overrides::from([(Param::Light, 1)]));

        let o = Command::SetAutoXfan(true)
            .overrides(&state(HvacMode::Cool), &caps, &mut auto)
            .unwrap();
        assert!(auto.auto_xfan && o.is_empty());
        let o = Command::SetAutoXfan(false)
            .overrides(&state(HvacMode::Cool), &caps, &mut auto)
            .unwrap();
        assert_eq!(o, Overrides::from([(Param::XFan, 0)]));

        let o = Command::SetSwitch(Feature::LightSensor, true)
            .overrides(&state(HvacMode::Cool), &caps, &mut auto)
            .unwrap();
        assert!(auto.light_sensor_enabled);
        assert_eq!(o, Overrides::from([(Param::Light, 1), (Param::LightSensor, 0)]));

        let o = Command::SetLightSensorEnabled(false)
            .overrides(&state(HvacMode::Cool), &caps, &mut auto)
            .unwrap();
        assert!(!auto.light_sensor_enabled && o.is_empty());
    }
}
