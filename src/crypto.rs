//! Payload encryption for both key schemes.
//! AES-128-ECB with PKCS#7 padding (legacy) and AES-128-GCM with a detached tag (authenticated).

use crate::error::{GreeError, Result};
use aes::Aes128;
use aes_gcm::{
    Aes128Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use cipher::{BlockDecryptMut, BlockEncryptMut};
use ecb::{Decryptor, Encryptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const KEY_LEN: usize = 16;
pub const BLOCK_LEN: usize = 16;
pub const GCM_TAG_LEN: usize = 16;
pub const GCM_NONCE_LEN: usize = 12;

/// Generic key every legacy appliance accepts for the bind exchange.
pub const LEGACY_DEFAULT_KEY: &[u8; KEY_LEN] = b"a3K8Bx%2r8Y7#xDh";

/// Generic key for the authenticated bind exchange.
///
/// Recovered from device logs; confirm against a packet capture of the target
/// firmware before relying on it.
pub const GCM_DEFAULT_KEY: &[u8; KEY_LEN] = b"{yxAHAY_Lm6pbC/<";

/// Nonce used for every authenticated exchange.
///
/// The firmware expects a fixed all-zero nonce. Reusing a nonce under one key
/// voids GCM's confidentiality guarantees; this is accepted only because the
/// appliance will not interoperate otherwise.
pub const GCM_NONCE: [u8; GCM_NONCE_LEN] = [0u8; GCM_NONCE_LEN];

/// Key-exchange and payload-encryption scheme spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum KeyScheme {
    /// AES-ECB, PKCS#7 padding, no integrity tag (encryption version 1)
    #[default]
    Legacy = 1,
    /// AES-GCM with detached 16-byte tag (encryption version 2)
    Authenticated = 2,
}

impl KeyScheme {
    /// Well-known key used to encrypt the bind exchange.
    pub fn default_key(&self) -> &'static [u8; KEY_LEN] {
        match self {
            KeyScheme::Legacy => LEGACY_DEFAULT_KEY,
            KeyScheme::Authenticated => GCM_DEFAULT_KEY,
        }
    }

    pub fn version(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for KeyScheme {
    type Error = GreeError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(KeyScheme::Legacy),
            2 => Ok(KeyScheme::Authenticated),
            other => Err(GreeError::Rejected(format!(
                "encryption version {} is not implemented",
                other
            ))),
        }
    }
}

impl From<KeyScheme> for u8 {
    fn from(s: KeyScheme) -> u8 {
        s.version()
    }
}

impl fmt::Display for KeyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyScheme::Legacy => write!(f, "v1 (ECB)"),
            KeyScheme::Authenticated => write!(f, "v2 (GCM)"),
        }
    }
}

/// Per-device 16-byte symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| GreeError::InvalidKey(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl FromStr for SessionKey {
    type Err = GreeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.as_bytes())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Output of [`GreeCipher::encrypt`]. `tag` is only present for the authenticated scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: Option<Vec<u8>>,
}

enum Mode {
    Ecb([u8; KEY_LEN]),
    Gcm {
        cipher: Box<Aes128Gcm>,
        nonce: [u8; GCM_NONCE_LEN],
    },
}

/// GreeCipher encrypts and decrypts inner payloads under one key and scheme.
pub struct GreeCipher {
    scheme: KeyScheme,
    mode: Mode,
}

impl GreeCipher {
    /// Create a cipher for `scheme` with a 16-byte key.
    pub fn new(scheme: KeyScheme, key: &[u8]) -> Result<Self> {
        Ok(Self::from_session(scheme, &SessionKey::new(key)?))
    }

    /// Cipher keyed with the scheme's well-known bind key.
    pub fn bind_cipher(scheme: KeyScheme) -> Self {
        Self::from_session(scheme, &SessionKey(*scheme.default_key()))
    }

    pub fn from_session(scheme: KeyScheme, key: &SessionKey) -> Self {
        let k = key.0;
        let mode = match scheme {
            KeyScheme::Legacy => Mode::Ecb(k),
            KeyScheme::Authenticated => Mode::Gcm {
                cipher: Box::new(Aes128Gcm::new(&k.into())),
                nonce: GCM_NONCE,
            },
        };
        Self { scheme, mode }
    }

    /// Replace the nonce used by the authenticated scheme. No effect for ECB.
    pub fn with_nonce(mut self, new_nonce: [u8; GCM_NONCE_LEN]) -> Self {
        if let Mode::Gcm { nonce, .. } = &mut self.mode {
            *nonce = new_nonce;
        }
        self
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    /// Encrypt a plaintext payload.
    pub fn encrypt(&self, data: &[u8]) -> Result<Sealed> {
        match &self.mode {
            Mode::Ecb(key) => Ok(Sealed {
                ciphertext: encrypt_ecb(key, data),
                tag: None,
            }),
            Mode::Gcm { cipher, nonce } => {
                let payload = Payload {
                    msg: data,
                    aad: &[],
                };
                let mut ciphertext = cipher
                    .encrypt(Nonce::from_slice(nonce), payload)
                    .map_err(|_| GreeError::EncryptionFailed)?;
                // aes-gcm appends the tag to the ciphertext
                let tag = ciphertext.split_off(ciphertext.len() - GCM_TAG_LEN);
                Ok(Sealed {
                    ciphertext,
                    tag: Some(tag),
                })
            }
        }
    }

    /// Decrypt a payload. The authenticated scheme requires `tag`.
    pub fn decrypt(&self, data: &[u8], tag: Option<&[u8]>) -> Result<Vec<u8>> {
        match &self.mode {
            Mode::Ecb(key) => decrypt_ecb(key, data),
            Mode::Gcm { cipher, nonce } => {
                let tag = tag.ok_or(GreeError::DecryptionFailed)?;
                if tag.len() != GCM_TAG_LEN {
                    return Err(GreeError::DecryptionFailed);
                }
                let mut combined = Vec::with_capacity(data.len() + GCM_TAG_LEN);
                combined.extend_from_slice(data);
                combined.extend_from_slice(tag);

                let payload = Payload {
                    msg: &combined,
                    aad: &[],
                };
                cipher
                    .decrypt(Nonce::from_slice(nonce), payload)
                    .map_err(|_| GreeError::DecryptionFailed)
            }
        }
    }
}

fn encrypt_ecb(key: &[u8; KEY_LEN], data: &[u8]) -> Vec<u8> {
    let mut encryptor = Encryptor::<Aes128>::new(&(*key).into());

    // PKCS#7: always at least one byte of padding
    let padding_len = BLOCK_LEN - data.len() % BLOCK_LEN;
    let mut ciphertext = Vec::with_capacity(data.len() + padding_len);
    ciphertext.extend_from_slice(data);
    ciphertext.resize(data.len() + padding_len, padding_len as u8);

    for chunk in ciphertext.chunks_mut(BLOCK_LEN) {
        let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
        encryptor.encrypt_block_mut(block);
    }
    ciphertext
}

fn decrypt_ecb(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(GreeError::DecryptionFailed);
    }

    let mut decryptor = Decryptor::<Aes128>::new(&(*key).into());
    let mut plaintext = data.to_vec();
    for chunk in plaintext.chunks_mut(BLOCK_LEN) {
        let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
        decryptor.decrypt_block_mut(block);
    }

    let pad_len = plaintext[plaintext.len() - 1] as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN {
        return Err(GreeError::DecryptionFailed);
    }
    if plaintext[plaintext.len() - pad_len..]
        .iter()
        .any(|&b| b as usize != pad_len)
    {
        return Err(GreeError::DecryptionFailed);
    }
    plaintext.truncate(plaintext.len() - pad_len);
    Ok(plaintext)
}
