//! Device status codes carried in response headers.

use std::fmt;

/// Status reported by the secure element in the response header.
///
/// Unknown codes are preserved in [`DeviceStatus::Other`] so they can be
/// passed through to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    /// Command executed
    Ok,
    /// Frame received with a bad CRC or truncated
    CommunicationError,
    /// Command payload inconsistent with the command
    InconsistentCommandData,
    /// Internal device error
    UnexpectedError,
    /// Command code not supported by this device
    UnsupportedCommand,
    /// Command not allowed in the current life cycle state
    InvalidLifeCycleState,
    /// Access condition of the command not satisfied
    AccessConditionNotSatisfied,
    /// C-MAC verification failed on the device
    InvalidCmac,
    /// Device MAC counter reached its maximum
    CmacCounterMaxReached,
    /// Command needs a session that is not established
    WrongSession,
    /// Requested slot or zone does not exist
    EntryNotFound,
    /// Key slot empty or unusable for this command
    InvalidKey,
    /// Any other status code
    Other(u8),
}

impl DeviceStatus {
    /// Decode a five-bit status code.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x01 => Self::CommunicationError,
            0x02 => Self::InconsistentCommandData,
            0x03 => Self::UnexpectedError,
            0x04 => Self::UnsupportedCommand,
            0x05 => Self::InvalidLifeCycleState,
            0x06 => Self::AccessConditionNotSatisfied,
            0x07 => Self::InvalidCmac,
            0x08 => Self::CmacCounterMaxReached,
            0x09 => Self::WrongSession,
            0x0A => Self::EntryNotFound,
            0x0B => Self::InvalidKey,
            other => Self::Other(other),
        }
    }

    /// Status code as sent on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::CommunicationError => 0x01,
            Self::InconsistentCommandData => 0x02,
            Self::UnexpectedError => 0x03,
            Self::UnsupportedCommand => 0x04,
            Self::InvalidLifeCycleState => 0x05,
            Self::AccessConditionNotSatisfied => 0x06,
            Self::InvalidCmac => 0x07,
            Self::CmacCounterMaxReached => 0x08,
            Self::WrongSession => 0x09,
            Self::EntryNotFound => 0x0A,
            Self::InvalidKey => 0x0B,
            Self::Other(code) => code,
        }
    }

    /// True for [`DeviceStatus::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Statuses meaning the secure channel itself was rejected.
    #[must_use]
    pub const fn is_session_error(self) -> bool {
        matches!(
            self,
            Self::InvalidCmac
                | Self::CmacCounterMaxReached
                | Self::WrongSession
                | Self::AccessConditionNotSatisfied
        )
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "device status {code:#04x}"),
            known => write!(f, "{known:?} ({:#04x})", known.code()),
        }
    }
}
