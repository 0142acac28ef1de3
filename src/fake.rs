//! In-memory appliance used by unit tests.
//! Speaks the real wire format through the crate's own codec and ciphers.

use crate::codec::{FrameKind, decode_frame, encode_frame};
use crate::crypto::{GreeCipher, KeyScheme, SessionKey};
use crate::error::{GreeError, Result};
use crate::params::{BASE_PARAMS, Param};
use crate::transport::Transport;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use tokio::time::Duration;

pub(crate) const DEFAULT_FAKE_KEY: &str = "0123456789abcdef";
const STRAY_KEY: &str = "ffffffffffffffff";

struct FakeState {
    session_key: String,
    values: HashMap<String, Value>,
    requests: Vec<Value>,
    attempts: usize,
    fail_next: u32,
    garble_next: u32,
    corrupt_next: u32,
    truncate: usize,
    failing_cols: HashSet<String>,
    fail_commands: bool,
}

pub(crate) struct FakeAppliance {
    scheme: KeyScheme,
    mac: String,
    state: Mutex<FakeState>,
}

impl FakeAppliance {
    pub fn new(scheme: KeyScheme) -> Self {
        let mut values = HashMap::new();
        for p in BASE_PARAMS {
            values.insert(p.as_str().to_string(), json!(0));
        }
        values.insert("Pow".into(), json!(1));
        values.insert("Mod".into(), json!(1));
        values.insert("SetTem".into(), json!(24));
        values.insert("Lig".into(), json!(1));

        Self {
            scheme,
            mac: "c8f742a1b2c3".to_string(),
            state: Mutex::new(FakeState {
                session_key: DEFAULT_FAKE_KEY.to_string(),
                values,
                requests: Vec::new(),
                attempts: 0,
                fail_next: 0,
                garble_next: 0,
                corrupt_next: 0,
                truncate: 0,
                failing_cols: HashSet::new(),
                fail_commands: false,
            }),
        }
    }

    pub fn legacy() -> Self {
        Self::new(KeyScheme::Legacy)
    }

    pub fn authenticated() -> Self {
        Self::new(KeyScheme::Authenticated)
    }

    pub fn with_key(self, key: &str) -> Self {
        self.state.lock().session_key = key.to_string();
        self
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn set(&self, param: Param, value: Value) {
        self.state
            .lock()
            .values
            .insert(param.as_str().to_string(), value);
    }

    pub fn value(&self, param: Param) -> Value {
        self.state
            .lock()
            .values
            .get(param.as_str())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Decrypted inner payloads of every request that reached the device.
    pub fn requests(&self) -> Vec<Value> {
        self.state.lock().requests.clone()
    }

    pub fn requests_of(&self, t: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r["t"] == t)
            .collect()
    }

    /// Number of frames handed to the transport, delivered or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// The next `n` exchanges time out.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// The next `n` replies are not valid envelopes.
    pub fn garble_next(&self, n: u32) {
        self.state.lock().garble_next = n;
    }

    /// The next `n` replies are sealed under a key the client does not hold.
    pub fn corrupt_next(&self, n: u32) {
        self.state.lock().corrupt_next = n;
    }

    /// Drop `n` trailing entries from every status reply.
    pub fn truncate_status_replies(&self, n: usize) {
        self.state.lock().truncate = n;
    }

    /// Status reads that include `param` time out until cleared.
    pub fn fail_reads_of(&self, param: Param) {
        self.state
            .lock()
            .failing_cols
            .insert(param.as_str().to_string());
    }

    /// Command frames time out until cleared.
    pub fn fail_commands(&self) {
        self.state.lock().fail_commands = true;
    }

    pub fn clear_failures(&self) {
        let mut s = self.state.lock();
        s.failing_cols.clear();
        s.fail_commands = false;
        s.fail_next = 0;
        s.garble_next = 0;
        s.corrupt_next = 0;
        s.truncate = 0;
    }

    fn session_cipher(&self, key: &str) -> Result<GreeCipher> {
        Ok(GreeCipher::from_session(self.scheme, &key.parse::<SessionKey>()?))
    }

    fn handle(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut s = self.state.lock();
        s.attempts += 1;
        if s.fail_next > 0 {
            s.fail_next -= 1;
            return Err(GreeError::Timeout);
        }
        if s.garble_next > 0 {
            s.garble_next -= 1;
            return Ok(b"{\"t\":\"pack\"".to_vec());
        }

        let outer: Value = serde_json::from_slice(frame)?;
        let is_bind = outer["i"] == 1;
        let cipher = if is_bind {
            GreeCipher::bind_cipher(self.scheme)
        } else {
            self.session_cipher(&s.session_key)?
        };
        // A device that cannot decrypt a request stays silent.
        let request = decode_frame(&cipher, frame).map_err(|_| GreeError::Timeout)?;
        s.requests.push(request.clone());

        let reply = match request["t"].as_str() {
            Some("bind") => match self.scheme {
                KeyScheme::Legacy => {
                    json!({"t": "bindok", "key": s.session_key, "mac": self.mac, "r": 200})
                }
                KeyScheme::Authenticated => json!({"t": "bindok", "key": s.session_key}),
            },
            Some("status") => {
                let cols: Vec<String> = request["cols"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|c| c.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                if cols.iter().any(|c| s.failing_cols.contains(c)) {
                    s.requests.pop();
                    return Err(GreeError::Timeout);
                }
                let mut dat: Vec<Value> = cols
                    .iter()
                    .map(|c| s.values.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                dat.truncate(dat.len().saturating_sub(s.truncate));
                json!({"t": "dat", "mac": self.mac, "r": 200, "cols": cols, "dat": dat})
            }
            Some("cmd") => {
                if s.fail_commands {
                    s.requests.pop();
                    return Err(GreeError::Timeout);
                }
                let opt = request["opt"].as_array().cloned().unwrap_or_default();
                let p = request["p"].as_array().cloned().unwrap_or_default();
                for (name, value) in opt.iter().zip(&p) {
                    if let Some(name) = name.as_str() {
                        s.values.insert(name.to_string(), value.clone());
                    }
                }
                json!({"t": "res", "mac": self.mac, "r": 200, "opt": opt, "p": p})
            }
            _ => json!({"t": "error", "r": 400}),
        };

        if s.corrupt_next > 0 {
            s.corrupt_next -= 1;
            let stray = self.session_cipher(STRAY_KEY)?;
            return encode_frame(&stray, FrameKind::Operation, &self.mac, 0, &reply);
        }
        encode_frame(&cipher, FrameKind::Operation, &self.mac, 0, &reply)
    }
}

impl Transport for FakeAppliance {
    async fn exchange(&self, frame: Vec<u8>, _limit: Duration) -> Result<Vec<u8>> {
        self.handle(&frame)
    }
}
