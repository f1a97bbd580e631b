//! Device types and their fixed characteristics.
//!
//! Execution-time tables are indexed by the five-bit command code. Commands
//! a device does not implement keep a short default so that an unexpected
//! command still waits a plausible time before polling.

use std::time::Duration;

use stse_proto::CommandCode;

/// Number of entries in an execution-time table
pub const TIMING_TABLE_LEN: usize = 32;

/// Supported secure element families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// STSAFE-A100
    StsafeA100,
    /// STSAFE-A110
    StsafeA110,
    /// STSAFE-A120
    StsafeA120,
    /// STSAFE-L010 (no host session support)
    StsafeL010,
}

/// Width of the MAC counter carried in derivation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterWidth {
    /// 24-bit counter
    Bytes3,
    /// 32-bit counter
    Bytes4,
}

impl CounterWidth {
    /// Number of counter bytes
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::Bytes3 => 3,
            Self::Bytes4 => 4,
        }
    }

    /// Always false; present for API symmetry with `len`.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        false
    }

    /// Big-endian encoding truncated to the counter width.
    #[must_use]
    pub fn encode(self, counter: u32) -> Vec<u8> {
        counter.to_be_bytes()[4 - self.len()..].to_vec()
    }

    /// Decode a big-endian counter of this width.
    ///
    /// Returns `None` unless `bytes` has exactly the counter width.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Option<u32> {
        if bytes.len() != self.len() {
            return None;
        }
        Some(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }
}

/// Layout of the host key slot query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKeyQuery {
    /// Presence + 3-byte counter, AES-128 implied
    V1,
    /// Presence + key type + 4-byte counter
    V2,
}

// Milliseconds, indexed by command code.
#[rustfmt::skip]
const A110_EXECUTION_TIMES: [u16; TIMING_TABLE_LEN] = [
    //  echo  reset  random  session  decr  read  update
        5,    20,    5,      10,      15,   5,    15,
    //  0x07..0x10 reserved
        10,   10,    10,     10,      10,   10,   10,   10,   10,   10,
    //  genkey  0x12  0x13  query  0x15  gensig  verify  estab  standby  verpwd  enc  dec  attr  0x1E  ext
        150,    10,   10,   5,     10,   60,     90,     80,    5,       20,     10,  10,  15,   10,   10,
];

#[rustfmt::skip]
const A120_EXECUTION_TIMES: [u16; TIMING_TABLE_LEN] = [
        3,    15,    3,      8,       10,   3,    10,
        8,    8,     8,      8,       8,    8,    8,    8,    8,    8,
        90,   8,     8,      3,       8,    35,   55,     50,    3,       15,     8,   8,   10,   8,    8,
];

#[rustfmt::skip]
const L010_EXECUTION_TIMES: [u16; TIMING_TABLE_LEN] = [
        5,    20,    5,      10,      15,   10,   30,
        10,   10,    10,     10,      10,   10,   10,   10,   10,   10,
        10,   10,    10,     5,       10,   70,   10,     10,    5,       10,     10,  10,  10,   10,   10,
];

// Extended commands (sub-code index).
#[rustfmt::skip]
const A110_EXTENDED_EXECUTION_TIMES: [u16; TIMING_TABLE_LEN] = [
        20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20,
        20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20, 20,
];

#[rustfmt::skip]
const A120_EXTENDED_EXECUTION_TIMES: [u16; TIMING_TABLE_LEN] = [
        15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15,
        15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15,
];

#[rustfmt::skip]
const L010_EXTENDED_EXECUTION_TIMES: [u16; TIMING_TABLE_LEN] = [
        10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10,
        10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10,
];

impl DeviceType {
    /// MAC counter width, or `None` when host sessions are unsupported.
    #[must_use]
    pub const fn counter_width(self) -> Option<CounterWidth> {
        match self {
            Self::StsafeA100 | Self::StsafeA110 => Some(CounterWidth::Bytes3),
            Self::StsafeA120 => Some(CounterWidth::Bytes4),
            Self::StsafeL010 => None,
        }
    }

    /// Host key slot query layout, or `None` when unsupported.
    #[must_use]
    pub const fn host_key_query(self) -> Option<HostKeyQuery> {
        match self {
            Self::StsafeA100 | Self::StsafeA110 => Some(HostKeyQuery::V1),
            Self::StsafeA120 => Some(HostKeyQuery::V2),
            Self::StsafeL010 => None,
        }
    }

    /// Typical execution time of `code` on this device.
    #[must_use]
    pub fn execution_time(self, code: CommandCode) -> Duration {
        let table = match (self, code.is_extended()) {
            (Self::StsafeA100 | Self::StsafeA110, false) => &A110_EXECUTION_TIMES,
            (Self::StsafeA100 | Self::StsafeA110, true) => &A110_EXTENDED_EXECUTION_TIMES,
            (Self::StsafeA120, false) => &A120_EXECUTION_TIMES,
            (Self::StsafeA120, true) => &A120_EXTENDED_EXECUTION_TIMES,
            (Self::StsafeL010, false) => &L010_EXECUTION_TIMES,
            (Self::StsafeL010, true) => &L010_EXTENDED_EXECUTION_TIMES,
        };
        Duration::from_millis(u64::from(table[code.index()]))
    }
}
