//! Command and response header encoding.
//!
//! A command header is one byte (`[flags:3][code:5]`) or, for extended
//! commands, two bytes (`[flags:3][0x1F]` followed by the sub-code). The
//! protection flags always live in the top three bits of the first byte.
//!
//! A response header carries the device status in its low five bits.

use bitflags::bitflags;

use crate::{FrameElement, status::DeviceStatus};

/// Low five bits of a header byte: command code or status
pub const CODE_MASK: u8 = 0x1F;

/// Command code announcing a two-byte extended header
pub const EXTENDED_PREFIX: u8 = 0x1F;

bitflags! {
    /// Protection flags in the first command header byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u8 {
        /// A C-MAC is appended to the command
        const CMAC = 0b1000_0000;

        /// The device must append an R-MAC to the response
        const RMAC = 0b0100_0000;

        /// The host session keys protect this command
        const HOST_SESSION = 0b0010_0000;
    }
}

impl HeaderFlags {
    /// Flags set in a raw header byte (code bits are ignored)
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self::from_bits_truncate(byte)
    }

    /// Flags requested by every authenticated exchange
    #[must_use]
    pub const fn authenticated() -> Self {
        Self::CMAC.union(Self::RMAC)
    }
}

impl Default for HeaderFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Command number, standard or extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandCode {
    /// One-byte header, code in `0x00..0x1F`
    Standard(u8),
    /// Two-byte header `0x1F` + sub-code
    Extended(u8),
}

impl CommandCode {
    /// Echo the command payload
    pub const ECHO: Self = Self::Standard(0x00);
    /// Reset the device
    pub const RESET: Self = Self::Standard(0x01);
    /// Generate random bytes
    pub const GENERATE_RANDOM: Self = Self::Standard(0x02);
    /// Start a volatile session
    pub const START_SESSION: Self = Self::Standard(0x03);
    /// Decrement a counter zone
    pub const DECREMENT: Self = Self::Standard(0x04);
    /// Read a data zone
    pub const READ: Self = Self::Standard(0x05);
    /// Update a data zone
    pub const UPDATE: Self = Self::Standard(0x06);
    /// Generate a key pair
    pub const GENERATE_KEY: Self = Self::Standard(0x11);
    /// Query device information
    pub const QUERY: Self = Self::Standard(0x14);
    /// Generate a signature
    pub const GENERATE_SIGNATURE: Self = Self::Standard(0x16);
    /// Verify a signature
    pub const VERIFY_SIGNATURE: Self = Self::Standard(0x17);
    /// Establish a shared key
    pub const ESTABLISH_KEY: Self = Self::Standard(0x18);
    /// Enter standby
    pub const STANDBY: Self = Self::Standard(0x19);
    /// Verify a password
    pub const VERIFY_PASSWORD: Self = Self::Standard(0x1A);
    /// Encrypt with a symmetric key slot
    pub const ENCRYPT: Self = Self::Standard(0x1B);
    /// Decrypt with a symmetric key slot
    pub const DECRYPT: Self = Self::Standard(0x1C);
    /// Write a device attribute
    pub const PUT_ATTRIBUTE: Self = Self::Standard(0x1D);

    /// Five-bit index used by lookup tables
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Standard(code) | Self::Extended(code) => (code & CODE_MASK) as usize,
        }
    }

    /// True for two-byte extended commands
    #[must_use]
    pub const fn is_extended(self) -> bool {
        matches!(self, Self::Extended(_))
    }
}

/// Decoded command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    /// Command number
    pub code: CommandCode,
    /// Protection flags
    pub flags: HeaderFlags,
}

impl CommandHeader {
    /// Unprotected header for `code`.
    #[must_use]
    pub fn new(code: CommandCode) -> Self {
        Self { code, flags: HeaderFlags::empty() }
    }

    /// Encoded header bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self.code {
            CommandCode::Standard(code) => vec![self.flags.bits() | (code & CODE_MASK)],
            CommandCode::Extended(sub) => vec![self.flags.bits() | EXTENDED_PREFIX, sub],
        }
    }

    /// Header as an owned frame element.
    #[must_use]
    pub fn to_element(&self) -> FrameElement<'static> {
        match self.code {
            CommandCode::Standard(code) => FrameElement::byte(self.flags.bits() | (code & CODE_MASK)),
            CommandCode::Extended(sub) => {
                FrameElement::word(u16::from_be_bytes([self.flags.bits() | EXTENDED_PREFIX, sub]))
            },
        }
    }

    /// Decode a header from the start of `bytes`.
    ///
    /// Returns `None` when `bytes` is empty or an extended header is cut
    /// short.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let first = *bytes.first()?;
        let flags = HeaderFlags::from_byte(first);
        let code = if first & CODE_MASK == EXTENDED_PREFIX {
            CommandCode::Extended(*bytes.get(1)?)
        } else {
            CommandCode::Standard(first & CODE_MASK)
        };
        Some(Self { code, flags })
    }

    /// Encoded length: 1 or 2 bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.code.is_extended() { 2 } else { 1 }
    }

    /// Headers are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Decoded response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader(pub u8);

impl ResponseHeader {
    /// Response header size on the wire
    pub const SIZE: usize = 1;

    /// Device status in the low five bits.
    #[must_use]
    pub fn status(self) -> DeviceStatus {
        DeviceStatus::from_code(self.0 & CODE_MASK)
    }

    /// True when the device flagged an R-MAC in the response.
    #[must_use]
    pub fn has_rmac(self) -> bool {
        self.0 & HeaderFlags::CMAC.bits() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_header_layout() {
        let mut header = CommandHeader::new(CommandCode::QUERY);
        assert_eq!(header.to_bytes(), vec![0x14]);

        header.flags = HeaderFlags::authenticated() | HeaderFlags::HOST_SESSION;
        assert_eq!(header.to_bytes(), vec![0xF4]);
    }

    #[test]
    fn extended_header_layout() {
        let mut header = CommandHeader::new(CommandCode::Extended(0x05));
        header.flags = HeaderFlags::RMAC;
        assert_eq!(header.to_bytes(), vec![0x5F, 0x05]);
        assert_eq!(header.to_element().as_bytes(), &[0x5F, 0x05]);
        assert_eq!(header.len(), 2);
    }

    #[test]
    fn parse_round_trips_flags_and_code() {
        let header = CommandHeader::parse(&[0xE0 | 0x1B]).unwrap();
        assert_eq!(header.code, CommandCode::ENCRYPT);
        assert_eq!(header.flags, HeaderFlags::all());

        let header = CommandHeader::parse(&[0x9F, 0x02]).unwrap();
        assert_eq!(header.code, CommandCode::Extended(0x02));
        assert_eq!(header.flags, HeaderFlags::CMAC);

        assert!(CommandHeader::parse(&[0x1F]).is_none());
        assert!(CommandHeader::parse(&[]).is_none());
    }

    #[test]
    fn response_status_masks_flag_bits() {
        let header = ResponseHeader(0x80 | 0x07);
        assert_eq!(header.status(), DeviceStatus::InvalidCmac);
        assert!(header.has_rmac());
        assert_eq!(ResponseHeader(0x00).status(), DeviceStatus::Ok);
    }
}
