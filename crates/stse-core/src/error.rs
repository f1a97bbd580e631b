//! Error types for the STSE host stack.
//!
//! One error type covers every layer a transfer crosses: bus failures that
//! survived the retry budget, frame integrity failures, secure-channel
//! failures, and statuses reported by the device itself. Each variant keeps
//! the layer that produced it so callers can tell "the wire is noisy" from
//! "the session is out of sync".

use stse_crypto::{CryptoError, KeyType};
use stse_proto::{CommandCode, DeviceStatus, FrameError};
use thiserror::Error;

use crate::bus::BusError;

/// Errors returned by device operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StseError {
    /// Bus failure that outlasted the retry budget
    #[error("bus error after {attempts} attempts: {source}")]
    Bus {
        /// Last error reported by the driver
        source: BusError,
        /// Number of attempts made
        attempts: u16,
    },

    /// Response declares more bytes than any frame may carry
    #[error("response length {declared} exceeds maximum {max}")]
    BufferLengthExceeded {
        /// Length announced by the device
        declared: usize,
        /// Largest accepted length
        max: usize,
    },

    /// Response CRC does not match its contents
    #[error("CRC mismatch: received {received:#06x}, computed {computed:#06x}")]
    Crc {
        /// CRC carried by the frame
        received: u16,
        /// CRC computed over the received bytes
        computed: u16,
    },

    /// Frame construction failed
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Crypto platform failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Caller-supplied argument is unusable
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Command requires a host session but none is open
    #[error("no host session open")]
    NoSession,

    /// Device has no host key provisioned
    #[error("host key not provisioned on the device")]
    HostKeyNotProvisioned,

    /// Session keys do not match the provisioned host key type
    #[error("session key type mismatch: device expects {expected:?}")]
    KeyTypeMismatch {
        /// Key type provisioned on the device
        expected: KeyType,
    },

    /// Response MAC did not verify
    #[error("R-MAC verification failed")]
    RmacMismatch,

    /// Decrypted response is malformed
    #[error("response decryption failed: {0}")]
    Decryption(&'static str),

    /// Device response does not have the expected layout
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// Command access condition is `Never`
    #[error("command {0:?} is not permitted")]
    CommandNotPermitted(CommandCode),

    /// Operation not available on this device type
    #[error("not supported by this device: {0}")]
    Unsupported(&'static str),

    /// Device answered with a non-OK status
    #[error("device returned {0}")]
    Device(DeviceStatus),
}

impl StseError {
    /// Returns true for failures on the wire rather than in the protocol.
    ///
    /// The command may or may not have executed; the caller decides whether
    /// reissuing it is safe.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Bus { .. } | Self::Crc { .. } | Self::BufferLengthExceeded { .. })
    }

    /// Returns true if the secure channel must be re-established.
    pub fn is_session_error(&self) -> bool {
        match self {
            Self::NoSession | Self::RmacMismatch | Self::Decryption(_) => true,
            Self::Device(status) => status.is_session_error(),
            _ => false,
        }
    }

    /// Device status, when the device itself rejected the command.
    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self {
            Self::Device(status) => Some(*status),
            _ => None,
        }
    }
}
