//! Query command helpers.
//!
//! The query command (`0x14`) takes a one-byte tag and returns a record
//! describing some part of the device configuration. Queries are free and
//! unprotected, so they go through the raw transfer.
//!
//! ```text
//! host key slot v1:       [presence] [counter: 3 BE]                 (AES-128)
//! host key slot v2:       [presence] [key type] [counter: 4 BE]
//! command authorization:  [change right] [count] [record: 4] * count
//! record:                 [header] [extended header] [access] [encryption]
//! ```

use stse_crypto::{CryptoPlatform, KeyType};
use stse_proto::{CODE_MASK, CommandCode, CommandHeader, EXTENDED_PREFIX, Frame, FrameElement};

use crate::{
    bus::Bus,
    device::{CounterWidth, HostKeyQuery},
    env::Environment,
    error::StseError,
    handle::DeviceHandle,
    perso::{AccessCondition, AuthorizationRecord, EncryptionFlags},
};

/// Query tag of the host key slot (v1 layout)
pub const TAG_HOST_KEY_SLOT: u8 = 0x17;

/// Query tag of the host key slot (v2 layout)
pub const TAG_HOST_KEY_SLOT_V2: u8 = 0x1B;

/// Query tag of the command authorization table
pub const TAG_COMMAND_AUTHORIZATION: u8 = 0x10;

const AUTHORIZATION_RECORD_LEN: usize = 4;
const MAX_AUTHORIZATION_RECORDS: usize = 64;
const ENCRYPT_COMMAND_BIT: u8 = 0b10;
const ENCRYPT_RESPONSE_BIT: u8 = 0b01;

/// Contents of the host key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostKeySlot {
    /// A host key pair is provisioned
    pub provisioned: bool,
    /// Type of the provisioned keys
    pub key_type: KeyType,
    /// Width of the device MAC counter
    pub counter_width: CounterWidth,
    /// Current device MAC counter
    pub counter: u32,
}

impl HostKeySlot {
    /// Decode a query response payload.
    ///
    /// # Errors
    ///
    /// `StseError::MalformedResponse` if the payload does not match the
    /// layout.
    pub fn parse(layout: HostKeyQuery, payload: &[u8]) -> Result<Self, StseError> {
        match (layout, payload) {
            (HostKeyQuery::V1, [presence, counter @ ..]) if counter.len() == 3 => Ok(Self {
                provisioned: *presence != 0,
                key_type: KeyType::Aes128,
                counter_width: CounterWidth::Bytes3,
                counter: CounterWidth::Bytes3.decode(counter).unwrap_or_default(),
            }),
            (HostKeyQuery::V2, [presence, key_type, counter @ ..]) if counter.len() == 4 => {
                let key_type = match *key_type {
                    0 => KeyType::Aes128,
                    1 => KeyType::Aes256,
                    _ => return Err(StseError::MalformedResponse("unknown host key type")),
                };
                Ok(Self {
                    provisioned: *presence != 0,
                    key_type,
                    counter_width: CounterWidth::Bytes4,
                    counter: CounterWidth::Bytes4.decode(counter).unwrap_or_default(),
                })
            },
            _ => Err(StseError::MalformedResponse("host key slot length")),
        }
    }
}

/// Command authorization table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAuthorization {
    /// Whether the table may still be changed
    pub change_right: bool,
    /// One record per configured command
    pub records: Vec<AuthorizationRecord>,
}

impl CommandAuthorization {
    /// Decode a query response payload.
    ///
    /// # Errors
    ///
    /// `StseError::MalformedResponse` if the record count does not match
    /// the payload length.
    pub fn parse(payload: &[u8]) -> Result<Self, StseError> {
        let [change_right, count, records @ ..] = payload else {
            return Err(StseError::MalformedResponse("authorization table header"));
        };
        if records.len() != usize::from(*count) * AUTHORIZATION_RECORD_LEN {
            return Err(StseError::MalformedResponse("authorization record count"));
        }

        let records = records
            .chunks_exact(AUTHORIZATION_RECORD_LEN)
            .map(|record| {
                let code = if record[0] & CODE_MASK == EXTENDED_PREFIX {
                    CommandCode::Extended(record[1])
                } else {
                    CommandCode::Standard(record[0] & CODE_MASK)
                };
                AuthorizationRecord {
                    code,
                    access: AccessCondition::from_bits(record[2]),
                    encryption: EncryptionFlags {
                        command: record[3] & ENCRYPT_COMMAND_BIT != 0,
                        response: record[3] & ENCRYPT_RESPONSE_BIT != 0,
                    },
                }
            })
            .collect();

        Ok(Self { change_right: *change_right != 0, records })
    }
}

impl<B: Bus, C: CryptoPlatform, E: Environment> DeviceHandle<B, C, E> {
    /// Read the host key slot.
    ///
    /// # Errors
    ///
    /// - `StseError::Unsupported` if the device has no host key slot
    /// - transport, device or layout errors
    pub fn query_host_key_slot(&mut self) -> Result<HostKeySlot, StseError> {
        let Some(layout) = self.device_type.host_key_query() else {
            return Err(StseError::Unsupported("host key slot"));
        };
        let (tag, len) = match layout {
            HostKeyQuery::V1 => (TAG_HOST_KEY_SLOT, 4),
            HostKeyQuery::V2 => (TAG_HOST_KEY_SLOT_V2, 6),
        };

        let payload = self.query(tag, len)?;
        HostKeySlot::parse(layout, &payload)
    }

    /// Read the command authorization table.
    ///
    /// # Errors
    ///
    /// Transport, device or layout errors.
    pub fn query_command_authorization(&mut self) -> Result<CommandAuthorization, StseError> {
        let capacity = 2 + MAX_AUTHORIZATION_RECORDS * AUTHORIZATION_RECORD_LEN;
        let payload = self.query(TAG_COMMAND_AUTHORIZATION, capacity as u16)?;
        CommandAuthorization::parse(&payload)
    }

    fn query(&mut self, tag: u8, capacity: u16) -> Result<Vec<u8>, StseError> {
        let mut cmd = Frame::from_elements([
            CommandHeader::new(CommandCode::QUERY).to_element(),
            FrameElement::byte(tag),
        ])?;
        let mut rsp = Frame::from_elements([FrameElement::byte(0), FrameElement::zeroed(capacity)])?;

        self.raw_transfer(&mut cmd, &mut rsp)?;
        Ok(rsp.payload_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_slot_v1() {
        let slot = HostKeySlot::parse(HostKeyQuery::V1, &[0x01, 0x00, 0x01, 0x02]).unwrap();
        assert!(slot.provisioned);
        assert_eq!(slot.key_type, KeyType::Aes128);
        assert_eq!(slot.counter, 0x0102);
        assert_eq!(slot.counter_width, CounterWidth::Bytes3);
    }

    #[test]
    fn host_key_slot_v2() {
        let slot = HostKeySlot::parse(HostKeyQuery::V2, &[0x01, 0x01, 0, 0, 0, 9]).unwrap();
        assert_eq!(slot.key_type, KeyType::Aes256);
        assert_eq!(slot.counter, 9);

        let empty = HostKeySlot::parse(HostKeyQuery::V2, &[0x00, 0x00, 0, 0, 0, 0]).unwrap();
        assert!(!empty.provisioned);
    }

    #[test]
    fn host_key_slot_layout_errors() {
        assert!(HostKeySlot::parse(HostKeyQuery::V1, &[0x01, 0x00]).is_err());
        assert!(HostKeySlot::parse(HostKeyQuery::V2, &[0x01, 0x07, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn authorization_table() {
        let payload = [
            0x01, 0x02, // change right, two records
            0x16, 0x00, 0x03, 0x00, // generate signature: host
            0x1F, 0x05, 0x02, 0x03, // extended 0x05: admin, both directions encrypted
        ];
        let table = CommandAuthorization::parse(&payload).unwrap();

        assert!(table.change_right);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].code, CommandCode::GENERATE_SIGNATURE);
        assert_eq!(table.records[0].access, AccessCondition::Host);
        assert_eq!(table.records[1].code, CommandCode::Extended(0x05));
        assert_eq!(table.records[1].encryption, EncryptionFlags { command: true, response: true });
    }

    #[test]
    fn authorization_count_must_match() {
        assert!(CommandAuthorization::parse(&[0x00, 0x02, 0x16, 0x00, 0x03, 0x00]).is_err());
        assert!(CommandAuthorization::parse(&[0x00]).is_err());
    }
}
