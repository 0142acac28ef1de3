//! Wire envelope encoding and decoding.
//! The outer frame is plaintext JSON; `pack` (and `tag` for GCM) carry the encrypted inner object.

use crate::crypto::{GreeCipher, KeyScheme};
use crate::error::{GreeError, Result};
use base64::{Engine as _, engine::general_purpose};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sender identifier used by client applications.
pub const CLIENT_CID: &str = "app";
/// Outer type of every encrypted frame.
pub const FRAME_TYPE_PACK: &str = "pack";

/// Distinguishes bind frames from regular encrypted operations (`i` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Bind = 1,
    Operation = 0,
}

/// Outgoing envelope, serialized field-for-field.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub cid: String,
    pub i: u8,
    pub t: String,
    pub uid: u32,
    pub tcid: String,
    pub pack: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Incoming envelope. Only `pack` is required by both schemes; `tag` by GCM.
/// The addressing fields (`cid`, `i`, `tcid`, `uid`) are ignored on replies, and
/// an unexpected outer `t` is only logged.
#[derive(Debug, Clone, Deserialize)]
struct IncomingEnvelope {
    #[serde(default)]
    t: Option<String>,
    pack: String,
    #[serde(default)]
    tag: Option<String>,
}

/// Encrypt `payload` and wrap it in an envelope addressed to `mac`.
pub fn encode_frame(
    cipher: &GreeCipher,
    kind: FrameKind,
    mac: &str,
    uid: u32,
    payload: &Value,
) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(payload)?;
    debug!(
        "Encoding {:?} frame for {}: {}",
        kind,
        mac,
        String::from_utf8_lossy(&plaintext)
    );
    let sealed = cipher.encrypt(&plaintext)?;

    let envelope = Envelope {
        cid: CLIENT_CID.to_string(),
        i: kind as u8,
        t: FRAME_TYPE_PACK.to_string(),
        uid,
        tcid: mac.to_string(),
        pack: general_purpose::STANDARD.encode(&sealed.ciphertext),
        tag: sealed.tag.map(|t| general_purpose::STANDARD.encode(t)),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parse an envelope and return the decrypted inner JSON object.
pub fn decode_frame(cipher: &GreeCipher, data: &[u8]) -> Result<Value> {
    let envelope: IncomingEnvelope = serde_json::from_slice(data)
        .map_err(|e| GreeError::MalformedFrame(format!("envelope: {}", e)))?;

    if let Some(t) = envelope.t.as_deref()
        && t != FRAME_TYPE_PACK
        && t != "bindok"
    {
        debug!("Unexpected outer frame type '{}'", t);
    }

    let ciphertext = general_purpose::STANDARD
        .decode(envelope.pack.as_bytes())
        .map_err(|e| GreeError::MalformedFrame(format!("pack is not base64: {}", e)))?;

    let tag = match (cipher.scheme(), envelope.tag) {
        (KeyScheme::Authenticated, None) => {
            return Err(GreeError::MalformedFrame("missing tag".into()));
        }
        (KeyScheme::Authenticated, Some(t)) => Some(
            general_purpose::STANDARD
                .decode(t.as_bytes())
                .map_err(|e| GreeError::MalformedFrame(format!("tag is not base64: {}", e)))?,
        ),
        (KeyScheme::Legacy, _) => None,
    };

    let plaintext = cipher.decrypt(&ciphertext, tag.as_deref())?;
    serde_json::from_slice(&plaintext).map_err(|e| {
        debug!("Undecodable inner payload (hex): {}", hex::encode(&plaintext));
        GreeError::MalformedFrame(format!("inner payload: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LEGACY_DEFAULT_KEY;
    use serde_json::json;

    const MAC: &str = "c8f742a1b2c3";

    fn outer(frame: &[u8]) -> Value {
        serde_json::from_slice(frame).unwrap()
    }

    #[test]
    fn legacy_bind_frame_layout() {
        let cipher = GreeCipher::bind_cipher(KeyScheme::Legacy);
        let payload = json!({"mac": MAC, "t": "bind", "uid": 0});
        let frame = encode_frame(&cipher, FrameKind::Bind, MAC, 0, &payload).unwrap();

        let env = outer(&frame);
        assert_eq!(env["cid"], "app");
        assert_eq!(env["i"], 1);
        assert_eq!(env["t"], "pack");
        assert_eq!(env["uid"], 0);
        assert_eq!(env["tcid"], MAC);
        assert!(env.get("tag").is_none());
        assert_eq!(decode_frame(&cipher, &frame).unwrap(), payload);
    }

    #[test]
    fn gcm_frame_carries_tag() {
        let cipher = GreeCipher::bind_cipher(KeyScheme::Authenticated);
        let payload = json!({"cols": ["Pow"], "mac": MAC, "t": "status"});
        let frame = encode_frame(&cipher, FrameKind::Operation, MAC, 7, &payload).unwrap();

        let env = outer(&frame);
        assert_eq!(env["i"], 0);
        assert_eq!(env["uid"], 7);
        assert!(env["tag"].is_string());
        assert_eq!(decode_frame(&cipher, &frame).unwrap(), payload);
    }

    #[test]
    fn invalid_json_is_malformed() {
        let cipher = GreeCipher::bind_cipher(KeyScheme::Legacy);
        assert!(matches!(
            decode_frame(&cipher, b"not json"),
            Err(GreeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn missing_pack_is_malformed() {
        let cipher = GreeCipher::bind_cipher(KeyScheme::Legacy);
        let frame = serde_json::to_vec(&json!({"t": "pack", "i": 0})).unwrap();
        assert!(matches!(
            decode_frame(&cipher, &frame),
            Err(GreeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn missing_tag_is_malformed_for_gcm() {
        let gcm = GreeCipher::bind_cipher(KeyScheme::Authenticated);
        let frame = encode_frame(&gcm, FrameKind::Bind, MAC, 0, &json!({})).unwrap();
        let mut env = outer(&frame);
        env.as_object_mut().unwrap().remove("tag");
        let stripped = serde_json::to_vec(&env).unwrap();
        assert!(matches!(
            decode_frame(&gcm, &stripped),
            Err(GreeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn reply_without_addressing_fields_decodes() {
        let cipher = GreeCipher::bind_cipher(KeyScheme::Legacy);
        let payload = json!({"t": "bindok", "key": "0123456789abcdef"});
        let frame = encode_frame(&cipher, FrameKind::Bind, MAC, 0, &payload).unwrap();
        let env = outer(&frame);
        let bare = serde_json::to_vec(&json!({"pack": env["pack"]})).unwrap();
        assert_eq!(decode_frame(&cipher, &bare).unwrap(), payload);
    }

    #[test]
    fn bad_base64_is_malformed() {
        let cipher = GreeCipher::bind_cipher(KeyScheme::Legacy);
        let frame = serde_json::to_vec(&json!({"t": "pack", "pack": "***"})).unwrap();
        assert!(matches!(
            decode_frame(&cipher, &frame),
            Err(GreeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn wrong_key_is_decryption_failure_or_garbage() {
        let sender = GreeCipher::new(KeyScheme::Legacy, b"0123456789abcdef").unwrap();
        let receiver = GreeCipher::new(KeyScheme::Legacy, LEGACY_DEFAULT_KEY).unwrap();
        let frame = encode_frame(&sender, FrameKind::Operation, MAC, 0, &json!({"r": 200})).unwrap();
        let err = decode_frame(&receiver, &frame).unwrap_err();
        assert!(matches!(
            err,
            GreeError::DecryptionFailed | GreeError::MalformedFrame(_)
        ));
    }
}
