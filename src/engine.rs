//! Synchronization engine: owns the session key, the snapshot and the
//! capability/availability state of one appliance.
//!
//! A cycle runs strictly in order: bind (if needed), probe unresolved
//! capabilities, read the steady-state list, merge caller overrides, write.

use crate::bind;
use crate::command::{Automation, Command};
use crate::config::DeviceConfig;
use crate::crypto::{GreeCipher, SessionKey};
use crate::error::{GreeError, Result};
use crate::params::{BASE_PARAMS, Channel, Overrides, Param, Snapshot};
use crate::state::ClimateState;
use crate::transport::Transport;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

/// Result of looking for an optional hardware feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ProbeOutcome {
    /// Not probed yet, or the last probe failed in transit.
    #[default]
    Unknown,
    Present,
    Absent,
}

impl ProbeOutcome {
    pub fn is_present(&self) -> bool {
        *self == ProbeOutcome::Present
    }

    pub fn is_resolved(&self) -> bool {
        *self != ProbeOutcome::Unknown
    }
}

/// Optional features discovered by probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    TemperatureSensor,
    AntiDirectBlow,
    LightSensor,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::TemperatureSensor,
        Capability::AntiDirectBlow,
        Capability::LightSensor,
    ];

    /// Parameter read to detect the feature.
    pub fn param(&self) -> Param {
        match self {
            Capability::TemperatureSensor => Param::BuiltInTemperature,
            Capability::AntiDirectBlow => Param::AntiDirectBlow,
            Capability::LightSensor => Param::LightSensor,
        }
    }

    /// Whether `config` asks for this feature to be probed.
    pub fn is_wanted(&self, config: &DeviceConfig) -> bool {
        match self {
            Capability::TemperatureSensor => !config.external_temperature_sensor,
            Capability::AntiDirectBlow => config.anti_direct_blow,
            Capability::LightSensor => config.light_sensor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub temperature_sensor: ProbeOutcome,
    pub anti_direct_blow: ProbeOutcome,
    pub light_sensor: ProbeOutcome,
}

impl Capabilities {
    pub fn get(&self, cap: Capability) -> ProbeOutcome {
        match cap {
            Capability::TemperatureSensor => self.temperature_sensor,
            Capability::AntiDirectBlow => self.anti_direct_blow,
            Capability::LightSensor => self.light_sensor,
        }
    }

    fn set(&mut self, cap: Capability, outcome: ProbeOutcome) {
        match cap {
            Capability::TemperatureSensor => self.temperature_sensor = outcome,
            Capability::AntiDirectBlow => self.anti_direct_blow = outcome,
            Capability::LightSensor => self.light_sensor = outcome,
        }
    }
}

/// Online/offline tracking driven by steady-state reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    online: bool,
    failures: u32,
    threshold: u32,
    disabled: bool,
}

impl Availability {
    pub fn new(threshold: u32, disabled: bool) -> Self {
        Self {
            online: true,
            failures: 0,
            threshold: threshold.max(1),
            disabled,
        }
    }

    pub fn is_online(&self) -> bool {
        self.disabled || self.online
    }

    /// Consecutive failures since the last success or the last offline transition.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count one failed read. Returns true when this failure took the device offline.
    pub fn record_failure(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        self.failures += 1;
        if self.failures < self.threshold {
            return false;
        }
        self.failures = 0;
        std::mem::replace(&mut self.online, false)
    }

    /// Count one successful read. Returns true when the device came back online.
    pub fn record_success(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        self.failures = 0;
        !std::mem::replace(&mut self.online, true)
    }
}

/// Keeps a local mirror of one appliance consistent with the device and with caller intent.
pub struct SyncEngine<T: Transport> {
    config: DeviceConfig,
    transport: T,
    session_key: Option<SessionKey>,
    snapshot: Snapshot,
    fetch_list: Vec<Param>,
    capabilities: Capabilities,
    availability: Availability,
    first_cycle: bool,
    external_temperature: Option<f64>,
    automation: Automation,
}

impl<T: Transport> SyncEngine<T> {
    /// Fails only if the configured pre-shared key is not 16 bytes.
    pub fn new(config: DeviceConfig, transport: T) -> Result<Self> {
        let session_key = config.session_key()?;
        Ok(Self {
            availability: Availability::new(
                config.max_online_attempts,
                config.disable_available_check,
            ),
            automation: Automation::from_config(&config),
            config,
            transport,
            session_key,
            snapshot: Snapshot::with_base(),
            fetch_list: BASE_PARAMS.to_vec(),
            capabilities: Capabilities::default(),
            first_cycle: true,
            external_temperature: None,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    pub fn automation(&self) -> Automation {
        self.automation
    }

    /// Parameters read on every cycle, in request order.
    pub fn fetch_list(&self) -> &[Param] {
        &self.fetch_list
    }

    pub fn is_online(&self) -> bool {
        self.availability.is_online()
    }

    pub fn is_bound(&self) -> bool {
        self.session_key.is_some()
    }

    /// Supply (or clear) the externally observed room temperature.
    pub fn set_external_temperature(&mut self, value: Option<f64>) {
        match value {
            Some(v) if !v.is_finite() => {
                warn!("Ignoring non-finite external temperature for {}", self.config.mac);
            }
            other => self.external_temperature = other,
        }
    }

    /// Derived view of the current snapshot.
    pub fn state(&self) -> ClimateState {
        ClimateState::derive(
            &self.snapshot,
            &self.capabilities,
            &self.config,
            self.external_temperature,
            self.is_online(),
        )
    }

    /// Run the bind handshake and store the resulting key. Availability is not touched.
    pub async fn bind(&mut self) -> Result<()> {
        let key = bind::bind(
            &self.transport,
            self.config.scheme,
            &self.config.mac,
            self.config.timeout_duration(),
        )
        .await?;
        self.session_key = Some(key);
        Ok(())
    }

    /// Forget the session key; the next exchange binds again.
    pub fn unbind(&mut self) {
        if self.session_key.take().is_some() {
            info!("Unbound {}", self.config.mac);
        }
    }

    async fn ensure_bound(&mut self) -> Result<GreeCipher> {
        if self.session_key.is_none() {
            self.bind().await?;
        }
        match &self.session_key {
            Some(key) => Ok(GreeCipher::from_session(self.config.scheme, key)),
            None => Err(GreeError::bind_failed(GreeError::MalformedFrame(
                "no session key after bind".into(),
            ))),
        }
    }

    fn channel<'a>(&'a self, cipher: &'a GreeCipher) -> Channel<'a, T> {
        Channel {
            transport: &self.transport,
            cipher,
            mac: &self.config.mac,
            uid: self.config.uid,
            timeout: self.config.timeout_duration(),
        }
    }

    /// Read `params` from the device, binding first if needed.
    pub async fn read_parameters(&mut self, params: &[Param]) -> Result<Vec<Option<i64>>> {
        let cipher = self.ensure_bound().await?;
        self.channel(&cipher).read(params).await
    }

    /// Write parallel lists of parameters and values, binding first if needed.
    pub async fn write_parameters(&mut self, params: &[Param], values: &[i64]) -> Result<Value> {
        let cipher = self.ensure_bound().await?;
        self.channel(&cipher).write(params, values).await
    }

    /// Resolve one capability. Never fails: transit errors leave it `Unknown`.
    pub async fn probe(&mut self, cap: Capability) -> ProbeOutcome {
        let current = self.capabilities.get(cap);
        if current.is_resolved() {
            return current;
        }

        let param = cap.param();
        debug!("Probing {} for {:?}", self.config.mac, cap);
        let outcome = match self.read_parameters(&[param]).await {
            Ok(values) if values.first().copied().flatten().is_some() => ProbeOutcome::Present,
            Ok(_) => ProbeOutcome::Absent,
            Err(e) => {
                info!(
                    "Could not probe {:?} on {}: {}. Retrying next cycle",
                    cap, self.config.mac, e
                );
                return ProbeOutcome::Unknown;
            }
        };

        if outcome.is_present() {
            self.snapshot.track(param);
            if !self.fetch_list.contains(&param) {
                self.fetch_list.push(param);
            }
        }
        info!("{} {:?}: {:?}", self.config.mac, cap, outcome);
        self.capabilities.set(cap, outcome);
        outcome
    }

    /// One read-modify-write cycle. Overrides are merged over the device's values
    /// and written, except on the first cycle after construction.
    pub async fn synchronize(&mut self, overrides: &Overrides) -> Result<ClimateState> {
        debug!("Synchronizing {} with {} overrides", self.config.mac, overrides.len());

        if self.session_key.is_none() {
            info!("Binding {} before first exchange", self.config.mac);
            self.bind().await?;
        }

        for cap in Capability::ALL {
            if cap.is_wanted(&self.config) {
                self.probe(cap).await;
            }
        }

        let fetch_list = self.fetch_list.clone();
        let values = match self.read_parameters(&fetch_list).await {
            Ok(values) => values,
            Err(e) => {
                if self.availability.record_failure() {
                    warn!(
                        "{} failed {} consecutive reads, marking offline",
                        self.config.mac, self.config.max_online_attempts
                    );
                } else {
                    warn!("Could not read {}: {}", self.config.mac, e);
                }
                return Err(e);
            }
        };
        if self.availability.record_success() {
            info!("{} is back online", self.config.mac);
        }
        self.snapshot.merge_values(&fetch_list, &values);

        self.snapshot.apply(overrides);
        if self.first_cycle {
            self.first_cycle = false;
        } else if !overrides.is_empty() {
            let ack = self
                .write_parameters(&overrides.params(), &overrides.values())
                .await?;
            debug!("{} acknowledged write: {}", self.config.mac, ack);
        }

        Ok(self.state())
    }

    /// Translate `command` against the current state and synchronize with the result.
    ///
    /// A fresh engine runs one plain cycle first so the command is checked
    /// against real device state and is not absorbed by the initial cycle.
    pub async fn execute(&mut self, command: &Command) -> Result<ClimateState> {
        if self.first_cycle {
            self.synchronize(&Overrides::new()).await?;
        }
        let current = self.state();
        let overrides = command.overrides(&current, &self.capabilities, &mut self.automation)?;
        if overrides.is_empty() {
            return Ok(current);
        }
        self.synchronize(&overrides).await
    }
}
