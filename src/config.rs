//! Per-device connection and feature settings.

use crate::crypto::{KEY_LEN, KeyScheme, SessionKey};
use crate::error::{GreeError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::time::Duration;

pub const DEFAULT_PORT: u16 = 7000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_ONLINE_ATTEMPTS: u32 = 3;

/// Everything the driver needs to know about one appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    /// Physical identifier, stored without separators and lower-cased.
    #[serde(deserialize_with = "deserialize_mac")]
    pub mac: String,
    /// Per-exchange timeout in seconds.
    pub timeout: u64,
    #[serde(alias = "encryption_version")]
    pub scheme: KeyScheme,
    /// Pre-shared session key. When absent the device is bound on first use.
    pub encryption_key: Option<String>,
    pub uid: u32,
    /// Consecutive failed reads before the device is reported offline.
    pub max_online_attempts: u32,
    pub disable_available_check: bool,
    pub horizontal_swing: bool,
    /// Current temperature comes from an external reading; the built-in sensor is not probed.
    pub external_temperature_sensor: bool,
    pub anti_direct_blow: bool,
    pub light_sensor: bool,
    pub auto_light: bool,
    pub auto_xfan: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            mac: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            scheme: KeyScheme::Legacy,
            encryption_key: None,
            uid: 0,
            max_online_attempts: DEFAULT_MAX_ONLINE_ATTEMPTS,
            disable_available_check: false,
            horizontal_swing: false,
            external_temperature_sensor: false,
            anti_direct_blow: false,
            light_sensor: false,
            auto_light: false,
            auto_xfan: false,
        }
    }
}

impl DeviceConfig {
    pub fn new<H: Into<String>>(host: H, mac: &str) -> Self {
        Self {
            host: host.into(),
            mac: normalize_mac(mac),
            ..Self::default()
        }
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The configured pre-shared key, if any.
    pub fn session_key(&self) -> Result<Option<SessionKey>> {
        self.encryption_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(str::parse)
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GreeError::Rejected("host must not be empty".into()));
        }
        if self.mac.is_empty() {
            return Err(GreeError::Rejected("mac must not be empty".into()));
        }
        if self.timeout == 0 {
            return Err(GreeError::Rejected("timeout must be positive".into()));
        }
        if self.max_online_attempts == 0 {
            return Err(GreeError::Rejected(
                "max_online_attempts must be positive".into(),
            ));
        }
        if let Some(key) = self.encryption_key.as_deref()
            && !key.is_empty()
            && key.len() != KEY_LEN
        {
            return Err(GreeError::InvalidKey(key.len()));
        }
        Ok(())
    }
}

/// Strip separators and lower-case a MAC-like identifier.
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn deserialize_mac<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_mac(&raw))
}
