//! Device parameters and the status/command exchanges that read and write them.

use crate::codec::{FrameKind, decode_frame, encode_frame};
use crate::crypto::GreeCipher;
use crate::error::{GreeError, Result};
use crate::transport::Transport;
use log::debug;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::time::Duration;

define_params! {
    /// Power (0 off, 1 on)
    Power = "Pow",
    /// Operating mode index
    Mode = "Mod",
    /// Target temperature in °C
    SetTemperature = "SetTem",
    /// Fan speed index
    FanSpeed = "WdSpd",
    /// Fresh air valve
    Air = "Air",
    /// X-Fan (blow dry after cooling)
    XFan = "Blo",
    /// Health (ionizer)
    Health = "Health",
    /// Sleep switch
    SleepSwitch = "SwhSlp",
    /// Display light
    Light = "Lig",
    /// Horizontal louver position
    SwingHorizontal = "SwingLfRig",
    /// Vertical louver position
    SwingVertical = "SwUpDn",
    /// Quiet fan
    Quiet = "Quiet",
    /// Turbo fan
    Turbo = "Tur",
    /// 8 °C heating (frost protection)
    EightDegreeHeat = "StHt",
    /// Temperature unit
    TemperatureUnit = "TemUn",
    HeatCoolType = "HeatCoolType",
    TemperatureRecord = "TemRec",
    /// Energy saving
    PowerSave = "SvSt",
    /// Sleep mode
    SleepMode = "SlpMod",
    /// Built-in room temperature sensor, offset by 40
    BuiltInTemperature = "TemSen",
    /// Anti direct blow
    AntiDirectBlow = "AntiDirectBlow",
    /// Built-in light sensor
    LightSensor = "LigSen",
}

/// Parameters every device reports; fetched on each cycle.
pub const BASE_PARAMS: &[Param] = &[
    Param::Power,
    Param::Mode,
    Param::SetTemperature,
    Param::FanSpeed,
    Param::Air,
    Param::XFan,
    Param::Health,
    Param::SleepSwitch,
    Param::Light,
    Param::SwingHorizontal,
    Param::SwingVertical,
    Param::Quiet,
    Param::Turbo,
    Param::EightDegreeHeat,
    Param::TemperatureUnit,
    Param::HeatCoolType,
    Param::TemperatureRecord,
    Param::PowerSave,
    Param::SleepMode,
];

/// Last-known parameter values. A key maps to `None` when known but unreported.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    values: BTreeMap<Param, Option<i64>>,
}

impl Snapshot {
    /// Snapshot holding every base parameter with no value yet.
    pub fn with_base() -> Self {
        Self {
            values: BASE_PARAMS.iter().map(|p| (*p, None)).collect(),
        }
    }

    pub fn get(&self, param: Param) -> Option<i64> {
        self.values.get(&param).copied().flatten()
    }

    pub fn contains(&self, param: Param) -> bool {
        self.values.contains_key(&param)
    }

    pub fn set(&mut self, param: Param, value: Option<i64>) {
        self.values.insert(param, value);
    }

    /// Adds a key without overwriting an existing value.
    pub fn track(&mut self, param: Param) {
        self.values.entry(param).or_insert(None);
    }

    /// Overwrite the given keys with positionally aligned values.
    pub fn merge_values(&mut self, params: &[Param], values: &[Option<i64>]) {
        for (param, value) in params.iter().zip(values) {
            self.values.insert(*param, *value);
        }
    }

    /// Overwrite the snapshot with caller-desired values.
    pub fn apply(&mut self, overrides: &Overrides) {
        for (param, value) in overrides.iter() {
            self.values.insert(param, Some(value));
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Param, Option<i64>)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }
}

/// Caller-desired values for one synchronization cycle, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    entries: Vec<(Param, i64)>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing an earlier one for the same parameter in place.
    pub fn set(&mut self, param: Param, value: i64) -> &mut Self {
        match self.entries.iter_mut().find(|(p, _)| *p == param) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((param, value)),
        }
        self
    }

    pub fn with(mut self, param: Param, value: i64) -> Self {
        self.set(param, value);
        self
    }

    pub fn get(&self, param: Param) -> Option<i64> {
        self.entries
            .iter()
            .find(|(p, _)| *p == param)
            .map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Param, i64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn params(&self) -> Vec<Param> {
        self.entries.iter().map(|(p, _)| *p).collect()
    }

    pub fn values(&self) -> Vec<i64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }
}

impl FromIterator<(Param, i64)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (Param, i64)>>(iter: I) -> Self {
        let mut overrides = Overrides::new();
        for (p, v) in iter {
            overrides.set(p, v);
        }
        overrides
    }
}

impl<const N: usize> From<[(Param, i64); N]> for Overrides {
    fn from(entries: [(Param, i64); N]) -> Self {
        entries.into_iter().collect()
    }
}

/// Interpret one `dat` entry. Devices report integers, occasionally as strings.
pub fn value_from_json(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// An addressed, keyed request/response path to one device.
pub struct Channel<'a, T: Transport> {
    pub transport: &'a T,
    pub cipher: &'a GreeCipher,
    pub mac: &'a str,
    pub uid: u32,
    pub timeout: Duration,
}

impl<T: Transport> Channel<'_, T> {
    /// Encrypt `payload`, send it, and return the decrypted reply.
    pub async fn request(&self, kind: FrameKind, payload: &Value) -> Result<Value> {
        let frame = encode_frame(self.cipher, kind, self.mac, self.uid, payload)?;
        let reply = self.transport.exchange(frame, self.timeout).await?;
        let decoded = decode_frame(self.cipher, &reply)?;
        debug!("Reply from {}: {}", self.mac, decoded);
        Ok(decoded)
    }

    /// Read `params`; values come back aligned with the request order.
    pub async fn read(&self, params: &[Param]) -> Result<Vec<Option<i64>>> {
        let cols: Vec<&str> = params.iter().map(|p| p.as_str()).collect();
        let payload = json!({
            "cols": cols,
            "mac": self.mac,
            "t": "status",
        });

        let reply = self.request(FrameKind::Operation, &payload).await?;
        let dat = reply
            .get("dat")
            .and_then(Value::as_array)
            .ok_or_else(|| GreeError::MalformedFrame("status reply without dat".into()))?;

        if dat.len() != params.len() {
            return Err(GreeError::ShapeMismatch {
                expected: params.len(),
                actual: dat.len(),
            });
        }
        Ok(dat.iter().map(value_from_json).collect())
    }

    /// Write parallel lists of parameters and values; returns the device's reply.
    pub async fn write(&self, params: &[Param], values: &[i64]) -> Result<Value> {
        if params.len() != values.len() {
            return Err(GreeError::ShapeMismatch {
                expected: params.len(),
                actual: values.len(),
            });
        }
        let opt: Vec<&str> = params.iter().map(|p| p.as_str()).collect();
        let payload = json!({
            "opt": opt,
            "p": values,
            "t": "cmd",
        });
        self.request(FrameKind::Operation, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyScheme, SessionKey};
    use crate::fake::FakeAppliance;

    const KEY: &str = "Key0123456789abc";

    fn cipher() -> GreeCipher {
        GreeCipher::from_session(KeyScheme::Legacy, &KEY.parse::<SessionKey>().unwrap())
    }

    fn channel<'a>(device: &'a FakeAppliance, cipher: &'a GreeCipher) -> Channel<'a, FakeAppliance> {
        Channel {
            transport: device,
            cipher,
            mac: device.mac(),
            uid: 0,
            timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn param_names_round_trip() {
        for p in Param::ALL {
            assert_eq!(p.as_str().parse::<Param>().unwrap(), *p);
        }
        assert!(matches!(
            "Bogus".parse::<Param>(),
            Err(GreeError::UnknownParam(_))
        ));
    }

    #[test]
    fn overrides_keep_first_position() {
        let o = Overrides::new()
            .with(Param::Power, 1)
            .with(Param::Mode, 4)
            .with(Param::Power, 0);
        assert_eq!(o.params(), vec![Param::Power, Param::Mode]);
        assert_eq!(o.values(), vec![0, 4]);
    }

    #[test]
    fn override_merge_touches_only_overridden_keys() {
        let mut snapshot = Snapshot::default();
        snapshot.set(Param::Power, Some(1));
        snapshot.set(Param::SetTemperature, Some(20));
        snapshot.apply(&Overrides::from([(Param::SetTemperature, 24)]));
        assert_eq!(snapshot.get(Param::Power), Some(1));
        assert_eq!(snapshot.get(Param::SetTemperature), Some(24));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn dat_values_are_coerced() {
        assert_eq!(value_from_json(&json!(3)), Some(3));
        assert_eq!(value_from_json(&json!("2")), Some(2));
        assert_eq!(value_from_json(&json!(24.0)), Some(24));
        assert_eq!(value_from_json(&json!(null)), None);
        assert_eq!(value_from_json(&json!("")), None);
    }

    #[tokio::test]
    async fn read_aligns_values_with_request() {
        let device = FakeAppliance::legacy().with_key(KEY);
        device.set(Param::Power, json!(1));
        device.set(Param::SetTemperature, json!(23));
        let cipher = cipher();

        let values = channel(&device, &cipher)
            .read(&[Param::SetTemperature, Param::Power])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(23), Some(1)]);
        assert_eq!(device.requests()[0]["t"], "status");
        assert_eq!(device.requests()[0]["mac"], device.mac());
    }

    #[tokio::test]
    async fn short_dat_is_shape_mismatch() {
        let device = FakeAppliance::legacy().with_key(KEY);
        device.truncate_status_replies(1);
        let cipher = cipher();

        let err = channel(&device, &cipher)
            .read(&[Param::Power, Param::Mode, Param::Quiet])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GreeError::ShapeMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn write_sends_parallel_lists_and_returns_ack() {
        let device = FakeAppliance::legacy().with_key(KEY);
        let cipher = cipher();

        let ack = channel(&device, &cipher)
            .write(&[Param::Power, Param::Mode], &[1, 4])
            .await
            .unwrap();
        assert_eq!(ack["r"], 200);

        let req = &device.requests()[0];
        assert_eq!(req["t"], "cmd");
        assert_eq!(req["opt"], json!(["Pow", "Mod"]));
        assert_eq!(req["p"], json!([1, 4]));
        assert_eq!(device.value(Param::Mode), json!(4));
    }

    #[tokio::test]
    async fn write_rejects_unequal_lists_without_traffic() {
        let device = FakeAppliance::legacy().with_key(KEY);
        let cipher = cipher();
        let err = channel(&device, &cipher)
            .write(&[Param::Power], &[1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, GreeError::ShapeMismatch { .. }));
        assert!(device.requests().is_empty());
    }

    #[tokio::test]
    async fn timeouts_propagate_unchanged() {
        let device = FakeAppliance::legacy().with_key(KEY);
        device.fail_next(1);
        let cipher = cipher();
        let err = channel(&device, &cipher).read(&[Param::Power]).await.unwrap_err();
        assert!(matches!(err, GreeError::Timeout));
    }
}
