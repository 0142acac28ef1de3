//! Error types and result definitions for the greelink crate.
//! Every failure the protocol stack can produce has its own inspectable kind.

use thiserror::Error;

/// Represents all possible errors that can occur when talking to an appliance.
#[derive(Error, Debug, Clone)]
pub enum GreeError {
    /// Standard IO error (socket creation, send, receive)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error of an inner payload
    #[error("JSON error: {0}")]
    Json(String),

    /// No reply within the configured timeout
    #[error("Timeout waiting for device")]
    Timeout,

    /// Envelope is not valid JSON, lacks a required field or carries bad base64
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Padding or authentication tag check failed (wrong key or scheme)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Failed to encrypt a payload for the device
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Key material is not exactly 16 bytes
    #[error("Invalid key: expected 16 bytes, got {0}")]
    InvalidKey(usize),

    /// Response array length disagrees with the request
    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Handshake did not yield a usable session key
    #[error("Bind failed: {0}")]
    BindFailed(Box<GreeError>),

    /// Parameter name not known to this driver
    #[error("Unknown parameter '{0}'")]
    UnknownParam(String),

    /// A command was refused by a state guard (e.g. device powered off)
    #[error("Command rejected: {0}")]
    Rejected(String),

    /// The device task has been stopped
    #[error("Device stopped")]
    Stopped,
}

/// A specialized Result type for appliance operations.
pub type Result<T> = std::result::Result<T, GreeError>;

impl From<std::io::Error> for GreeError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            GreeError::Timeout
        } else {
            GreeError::Io(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GreeError {
    fn from(err: serde_json::Error) -> Self {
        GreeError::Json(err.to_string())
    }
}

impl GreeError {
    /// Builds a `BindFailed` around the error that stopped the handshake.
    pub fn bind_failed(cause: GreeError) -> Self {
        match cause {
            GreeError::BindFailed(_) => cause,
            other => GreeError::BindFailed(Box::new(other)),
        }
    }

    /// True for failures that a later cycle may not hit again.
    ///
    /// Structural errors (`MalformedFrame`, `ShapeMismatch`, `Json`) point at a
    /// protocol mismatch and are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            GreeError::Io(_) | GreeError::Timeout | GreeError::DecryptionFailed => true,
            GreeError::BindFailed(cause) => cause.is_transient(),
            _ => false,
        }
    }

    /// True for errors that indicate the device speaks a different protocol shape.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GreeError::MalformedFrame(_) | GreeError::ShapeMismatch { .. } | GreeError::Json(_)
        )
    }
}
