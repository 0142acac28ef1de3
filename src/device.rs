//! Async handle to one appliance.
//! All requests are queued to a single background task that owns the engine,
//! so at most one exchange cycle is ever in flight per device.

use crate::command::Command;
use crate::config::DeviceConfig;
use crate::crypto::KeyScheme;
use crate::engine::{Capabilities, SyncEngine};
use crate::error::{GreeError, Result};
use crate::params::{Overrides, Param, Snapshot};
use crate::state::ClimateState;
use crate::transport::{Transport, UdpTransport};
use futures_core::stream::Stream;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const REQUEST_QUEUE_LEN: usize = 32;
const STATE_BROADCAST_LEN: usize = 16;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Internal requests for the background task.
enum DeviceRequest {
    Synchronize {
        overrides: Overrides,
        resp_tx: Reply<ClimateState>,
    },
    Execute {
        command: Command,
        resp_tx: Reply<ClimateState>,
    },
    Bind {
        resp_tx: Reply<()>,
    },
    Unbind {
        resp_tx: Reply<()>,
    },
    Read {
        params: Vec<Param>,
        resp_tx: Reply<Vec<Option<i64>>>,
    },
    Write {
        params: Vec<Param>,
        values: Vec<i64>,
        resp_tx: Reply<Value>,
    },
    SetExternalTemperature {
        value: Option<f64>,
        resp_tx: Reply<ClimateState>,
    },
}

impl DeviceRequest {
    fn reject(self, err: GreeError) {
        match self {
            DeviceRequest::Synchronize { resp_tx, .. }
            | DeviceRequest::Execute { resp_tx, .. }
            | DeviceRequest::SetExternalTemperature { resp_tx, .. } => {
                let _ = resp_tx.send(Err(err));
            }
            DeviceRequest::Bind { resp_tx } | DeviceRequest::Unbind { resp_tx } => {
                let _ = resp_tx.send(Err(err));
            }
            DeviceRequest::Read { resp_tx, .. } => {
                let _ = resp_tx.send(Err(err));
            }
            DeviceRequest::Write { resp_tx, .. } => {
                let _ = resp_tx.send(Err(err));
            }
        }
    }
}

/// Values the background task publishes for lock-protected accessors.
#[derive(Debug, Clone, Default)]
struct Published {
    state: ClimateState,
    snapshot: Snapshot,
    capabilities: Capabilities,
    online: bool,
    bound: bool,
    stopped: bool,
}

/// Handle to one appliance. Cheap to clone; clones share the same background task.
#[derive(Clone)]
pub struct Device {
    config: Arc<DeviceConfig>,
    published: Arc<RwLock<Published>>,
    tx: mpsc::Sender<DeviceRequest>,
    broadcast_tx: broadcast::Sender<ClimateState>,
    cancel_token: CancellationToken,
}

impl Device {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a handle speaking UDP to `config.host:config.port`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let transport = UdpTransport::new(config.host.clone(), config.port);
        Self::with_transport(config, transport)
    }

    /// Create a handle over a caller-supplied transport.
    pub fn with_transport<T: Transport + 'static>(config: DeviceConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let engine = SyncEngine::new(config.clone(), transport)?;

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_LEN);
        let (broadcast_tx, _) = broadcast::channel(STATE_BROADCAST_LEN);
        let published = Arc::new(RwLock::new(Published {
            state: engine.state(),
            snapshot: engine.snapshot().clone(),
            online: engine.is_online(),
            bound: engine.is_bound(),
            ..Published::default()
        }));
        let cancel_token = CancellationToken::new();

        let task = DeviceTask {
            engine,
            published: published.clone(),
            broadcast_tx: broadcast_tx.clone(),
            cancel_token: cancel_token.clone(),
        };
        tokio::spawn(task.run(rx));

        Ok(Self {
            config: Arc::new(config),
            published,
            tx,
            broadcast_tx,
            cancel_token,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn mac(&self) -> &str {
        &self.config.mac
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Last published climate state.
    pub fn state(&self) -> ClimateState {
        self.published.read().state.clone()
    }

    pub fn is_online(&self) -> bool {
        self.published.read().online
    }

    pub fn is_bound(&self) -> bool {
        self.published.read().bound
    }

    /// Last-known parameter values.
    pub fn snapshot(&self) -> Snapshot {
        self.published.read().snapshot.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.published.read().capabilities
    }

    pub fn is_stopped(&self) -> bool {
        self.published.read().stopped || self.cancel_token.is_cancelled()
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Run one cycle, writing `overrides` unless this is the first cycle.
    pub async fn synchronize(&self, overrides: Overrides) -> Result<ClimateState> {
        self.call(|resp_tx| DeviceRequest::Synchronize { overrides, resp_tx })
            .await
    }

    /// Poll the device without changing anything.
    pub async fn refresh(&self) -> Result<ClimateState> {
        self.synchronize(Overrides::new()).await
    }

    pub async fn execute(&self, command: Command) -> Result<ClimateState> {
        self.call(|resp_tx| DeviceRequest::Execute { command, resp_tx })
            .await
    }

    pub async fn bind(&self) -> Result<()> {
        self.call(|resp_tx| DeviceRequest::Bind { resp_tx }).await
    }

    pub async fn unbind(&self) -> Result<()> {
        self.call(|resp_tx| DeviceRequest::Unbind { resp_tx }).await
    }

    pub async fn read_parameters(&self, params: &[Param]) -> Result<Vec<Option<i64>>> {
        let params = params.to_vec();
        self.call(|resp_tx| DeviceRequest::Read { params, resp_tx })
            .await
    }

    pub async fn write_parameters(&self, params: &[Param], values: &[i64]) -> Result<Value> {
        let (params, values) = (params.to_vec(), values.to_vec());
        self.call(|resp_tx| DeviceRequest::Write {
            params,
            values,
            resp_tx,
        })
        .await
    }

    /// Supply the room temperature from an external sensor; `None` reverts to the built-in one.
    pub async fn set_external_temperature(&self, value: Option<f64>) -> Result<ClimateState> {
        self.call(|resp_tx| DeviceRequest::SetExternalTemperature { value, resp_tx })
            .await
    }

    // -------------------------------------------------------------------------
    // Streaming & shutdown
    // -------------------------------------------------------------------------

    /// States published after every successful cycle, starting from now.
    /// Ends once `stop()` is called and buffered states are drained.
    pub fn stream(&self) -> impl Stream<Item = ClimateState> + Send + 'static {
        let mut rx = self.broadcast_tx.subscribe();
        let cancel_token = self.cancel_token.clone();
        async_stream::stream! {
            loop {
                let received = tokio::select! {
                    biased;
                    received = rx.recv() => received,
                    _ = cancel_token.cancelled() => break,
                };
                match received {
                    Ok(state) => yield state,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("State stream lagged, skipped {} states", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stops the background task. Queued and later requests fail with `Stopped`.
    pub fn stop(&self) {
        info!("Stopping device {}", self.config.mac);
        self.published.write().stopped = true;
        self.cancel_token.cancel();
    }

    async fn call<R>(&self, make: impl FnOnce(Reply<R>) -> DeviceRequest) -> Result<R> {
        if self.is_stopped() {
            return Err(GreeError::Stopped);
        }
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(make(resp_tx))
            .await
            .map_err(|_| GreeError::Stopped)?;
        resp_rx.await.map_err(|_| GreeError::Stopped)?
    }
}

/// Background task owning the engine.
struct DeviceTask<T: Transport> {
    engine: SyncEngine<T>,
    published: Arc<RwLock<Published>>,
    broadcast_tx: broadcast::Sender<ClimateState>,
    cancel_token: CancellationToken,
}

impl<T: Transport> DeviceTask<T> {
    async fn run(mut self, mut rx: mpsc::Receiver<DeviceRequest>) {
        let mac = self.engine.config().mac.clone();
        debug!("Starting background task for device {}", mac);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Background task for {} received stop signal", mac);
                    break;
                }
                req = rx.recv() => match req {
                    Some(req) => self.handle(req).await,
                    None => break,
                },
            }
        }

        self.published.write().stopped = true;
        rx.close();
        while let Ok(req) = rx.try_recv() {
            req.reject(GreeError::Stopped);
        }
        debug!("Background task for {} exited", mac);
    }

    async fn handle(&mut self, req: DeviceRequest) {
        match req {
            DeviceRequest::Synchronize { overrides, resp_tx } => {
                let result = self.engine.synchronize(&overrides).await;
                self.finish_cycle(result, resp_tx);
            }
            DeviceRequest::Execute { command, resp_tx } => {
                let result = self.engine.execute(&command).await;
                self.finish_cycle(result, resp_tx);
            }
            DeviceRequest::Bind { resp_tx } => {
                let result = self.engine.bind().await;
                self.publish();
                let _ = resp_tx.send(result);
            }
            DeviceRequest::Unbind { resp_tx } => {
                self.engine.unbind();
                self.publish();
                let _ = resp_tx.send(Ok(()));
            }
            DeviceRequest::Read { params, resp_tx } => {
                let result = self.engine.read_parameters(&params).await;
                self.publish();
                let _ = resp_tx.send(result);
            }
            DeviceRequest::Write {
                params,
                values,
                resp_tx,
            } => {
                let result = self.engine.write_parameters(&params, &values).await;
                self.publish();
                let _ = resp_tx.send(result);
            }
            DeviceRequest::SetExternalTemperature { value, resp_tx } => {
                self.engine.set_external_temperature(value);
                let state = self.publish();
                let _ = self.broadcast_tx.send(state.clone());
                let _ = resp_tx.send(Ok(state));
            }
        }
    }

    fn finish_cycle(&mut self, result: Result<ClimateState>, resp_tx: Reply<ClimateState>) {
        let published = self.publish();
        match &result {
            Ok(state) => {
                let _ = self.broadcast_tx.send(state.clone());
            }
            Err(e) if !published.available => {
                warn!("{} is offline: {}", self.engine.config().mac, e);
            }
            Err(e) => debug!("Cycle for {} failed: {}", self.engine.config().mac, e),
        }
        let _ = resp_tx.send(result);
    }

    fn publish(&self) -> ClimateState {
        let state = self.engine.state();
        let mut published = self.published.write();
        published.state = state.clone();
        published.snapshot = self.engine.snapshot().clone();
        published.capabilities = self.engine.capabilities();
        published.online = self.engine.is_online();
        published.bound = self.engine.is_bound();
        state
    }
}

/// Builder for [`Device`].
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    config: DeviceConfig,
}

impl DeviceBuilder {
    pub fn new<H: Into<String>>(host: H, mac: &str) -> Self {
        Self {
            config: DeviceConfig::new(host, mac),
        }
    }

    pub fn from_config(config: DeviceConfig) -> Self {
        Self { config }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn scheme(mut self, scheme: KeyScheme) -> Self {
        self.config.scheme = scheme;
        self
    }

    pub fn encryption_key<K: Into<String>>(mut self, key: K) -> Self {
        self.config.encryption_key = Some(key.into());
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.config.uid = uid;
        self
    }

    /// Per-exchange timeout, rounded up to whole seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.config.timeout = secs.max(1);
        self
    }

    pub fn max_online_attempts(mut self, attempts: u32) -> Self {
        self.config.max_online_attempts = attempts;
        self
    }

    pub fn disable_available_check(mut self, disabled: bool) -> Self {
        self.config.disable_available_check = disabled;
        self
    }

    pub fn horizontal_swing(mut self, enabled: bool) -> Self {
        self.config.horizontal_swing = enabled;
        self
    }

    pub fn external_temperature_sensor(mut self, enabled: bool) -> Self {
        self.config.external_temperature_sensor = enabled;
        self
    }

    pub fn anti_direct_blow(mut self, enabled: bool) -> Self {
        self.config.anti_direct_blow = enabled;
        self
    }

    pub fn light_sensor(mut self, enabled: bool) -> Self {
        self.config.light_sensor = enabled;
        self
    }

    pub fn auto_light(mut self, enabled: bool) -> Self {
        self.config.auto_light = enabled;
        self
    }

    pub fn auto_xfan(mut self, enabled: bool) -> Self {
        self.config.auto_xfan = enabled;
        self
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Build a UDP-backed device. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Device> {
        Device::new(self.config)
    }

    pub fn build_with_transport<T: Transport + 'static>(self, transport: T) -> Result<Device> {
        Device::with_transport(self.config, transport)
    }
}
