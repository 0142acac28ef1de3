//! Binding handshake: trade the scheme's well-known key for a per-device session key.

use crate::codec::FrameKind;
use crate::crypto::{GreeCipher, KeyScheme, SessionKey};
use crate::error::{GreeError, Result};
use crate::params::Channel;
use crate::transport::Transport;
use log::{debug, info};
use serde_json::{Value, json};
use tokio::time::Duration;

/// Inner type of a successful bind reply.
pub const BIND_OK: &str = "bindok";

/// Build the inner bind request for `mac`.
pub fn bind_request(mac: &str) -> Value {
    json!({
        "mac": mac,
        "t": "bind",
        "uid": 0,
    })
}

/// Run the bind exchange for `scheme` and return the device's session key.
///
/// Every failure, including a well-formed reply that is not `bindok` or carries
/// a key of the wrong length, is reported as [`GreeError::BindFailed`].
pub async fn bind<T: Transport>(
    transport: &T,
    scheme: KeyScheme,
    mac: &str,
    timeout: Duration,
) -> Result<SessionKey> {
    exchange(transport, scheme, mac, timeout)
        .await
        .map_err(GreeError::bind_failed)
}

async fn exchange<T: Transport>(
    transport: &T,
    scheme: KeyScheme,
    mac: &str,
    timeout: Duration,
) -> Result<SessionKey> {
    let cipher = GreeCipher::bind_cipher(scheme);
    let channel = Channel {
        transport,
        cipher: &cipher,
        mac,
        uid: 0,
        timeout,
    };

    debug!("Binding {} using scheme {}", mac, scheme);
    let reply = channel.request(FrameKind::Bind, &bind_request(mac)).await?;
    let key = parse_bind_reply(&reply)?;
    info!("Bound {} (scheme {})", mac, scheme);
    Ok(key)
}

fn parse_bind_reply(reply: &Value) -> Result<SessionKey> {
    match reply.get("t").and_then(Value::as_str) {
        Some(BIND_OK) => {}
        other => {
            return Err(GreeError::MalformedFrame(format!(
                "expected {} reply, got {:?}",
                BIND_OK, other
            )));
        }
    }
    let key = reply
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| GreeError::MalformedFrame("bindok without key".into()))?;
    key.parse()
}
