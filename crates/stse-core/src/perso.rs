//! Personalization: per-command access conditions and encryption flags.
//!
//! The device reports, for every command it implements, who may run it and
//! whether its command or response payload travels encrypted. The table is
//! packed the way the device stores it: two bits of access condition per
//! command in a 64-bit mask, one bit per command and direction in 32-bit
//! encryption masks. Standard and extended commands have separate masks.

use stse_proto::CommandCode;

/// Who may execute a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessCondition {
    /// Command is disabled
    Never = 0,
    /// Anyone may execute
    Free = 1,
    /// Requires the admin (host) session
    Admin = 2,
    /// Requires a host session
    Host = 3,
}

impl AccessCondition {
    /// Decode the two low bits of `bits`.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Never,
            1 => Self::Free,
            2 => Self::Admin,
            _ => Self::Host,
        }
    }

    /// True when the command must be authenticated with session keys.
    #[must_use]
    pub const fn requires_session(self) -> bool {
        matches!(self, Self::Admin | Self::Host)
    }
}

/// Which payload directions of a command are encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EncryptionFlags {
    /// Command payload is encrypted
    pub command: bool,
    /// Response payload is encrypted
    pub response: bool,
}

impl EncryptionFlags {
    /// True if either direction is encrypted.
    #[must_use]
    pub const fn any(self) -> bool {
        self.command || self.response
    }
}

/// One row of the command authorization table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationRecord {
    /// Command the row applies to
    pub code: CommandCode,
    /// Access condition
    pub access: AccessCondition,
    /// Encryption flags
    pub encryption: EncryptionFlags,
}

// Every command free: access condition 0b01 in every slot.
const ALL_FREE: u64 = 0x5555_5555_5555_5555;

/// Packed personalization table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersoInfo {
    cmd_access: u64,
    ext_cmd_access: u64,
    cmd_encryption: u32,
    rsp_encryption: u32,
    ext_cmd_encryption: u32,
    ext_rsp_encryption: u32,
}

impl Default for PersoInfo {
    /// Every command free, nothing encrypted.
    fn default() -> Self {
        Self {
            cmd_access: ALL_FREE,
            ext_cmd_access: ALL_FREE,
            cmd_encryption: 0,
            rsp_encryption: 0,
            ext_cmd_encryption: 0,
            ext_rsp_encryption: 0,
        }
    }
}

impl PersoInfo {
    /// Table built from authorization records.
    ///
    /// Commands absent from `records` keep the default (free, unencrypted).
    #[must_use]
    pub fn from_records<'r>(records: impl IntoIterator<Item = &'r AuthorizationRecord>) -> Self {
        let mut perso = Self::default();
        for record in records {
            perso.set_access_condition(record.code, record.access);
            perso.set_encryption_flags(record.code, record.encryption);
        }
        perso
    }

    /// Access condition of `code`.
    #[must_use]
    pub fn access_condition(&self, code: CommandCode) -> AccessCondition {
        let mask = if code.is_extended() { self.ext_cmd_access } else { self.cmd_access };
        AccessCondition::from_bits((mask >> (code.index() * 2)) as u8)
    }

    /// Set the access condition of `code`.
    pub fn set_access_condition(&mut self, code: CommandCode, access: AccessCondition) {
        let shift = code.index() * 2;
        let mask = if code.is_extended() { &mut self.ext_cmd_access } else { &mut self.cmd_access };
        *mask = (*mask & !(0b11 << shift)) | (u64::from(access as u8) << shift);
    }

    /// Encryption flags of `code`.
    #[must_use]
    pub fn encryption_flags(&self, code: CommandCode) -> EncryptionFlags {
        let bit = 1u32 << code.index();
        let (cmd, rsp) = if code.is_extended() {
            (self.ext_cmd_encryption, self.ext_rsp_encryption)
        } else {
            (self.cmd_encryption, self.rsp_encryption)
        };
        EncryptionFlags { command: cmd & bit != 0, response: rsp & bit != 0 }
    }

    /// Set the encryption flags of `code`.
    pub fn set_encryption_flags(&mut self, code: CommandCode, flags: EncryptionFlags) {
        let bit = 1u32 << code.index();
        let (cmd, rsp) = if code.is_extended() {
            (&mut self.ext_cmd_encryption, &mut self.ext_rsp_encryption)
        } else {
            (&mut self.cmd_encryption, &mut self.rsp_encryption)
        };
        set_bit(cmd, bit, flags.command);
        set_bit(rsp, bit, flags.response);
    }

    /// Raw access masks `(standard, extended)`.
    #[must_use]
    pub fn access_masks(&self) -> (u64, u64) {
        (self.cmd_access, self.ext_cmd_access)
    }
}

fn set_bit(mask: &mut u32, bit: u32, value: bool) {
    if value {
        *mask |= bit;
    } else {
        *mask &= !bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_free_and_plaintext() {
        let perso = PersoInfo::default();
        for code in 0u8..0x1F {
            assert_eq!(perso.access_condition(CommandCode::Standard(code)), AccessCondition::Free);
            assert!(!perso.encryption_flags(CommandCode::Standard(code)).any());
        }
        assert_eq!(perso.access_condition(CommandCode::Extended(0x10)), AccessCondition::Free);
    }

    #[test]
    fn access_condition_packing() {
        let mut perso = PersoInfo::default();
        perso.set_access_condition(CommandCode::GENERATE_SIGNATURE, AccessCondition::Host);
        perso.set_access_condition(CommandCode::RESET, AccessCondition::Never);

        assert_eq!(perso.access_condition(CommandCode::GENERATE_SIGNATURE), AccessCondition::Host);
        assert_eq!(perso.access_condition(CommandCode::RESET), AccessCondition::Never);
        // neighbours untouched
        assert_eq!(perso.access_condition(CommandCode::VERIFY_SIGNATURE), AccessCondition::Free);
        assert_eq!(perso.access_condition(CommandCode::ECHO), AccessCondition::Free);

        let (standard, extended) = perso.access_masks();
        assert_eq!((standard >> (0x16 * 2)) & 0b11, 3);
        assert_eq!(extended, ALL_FREE);
    }

    #[test]
    fn extended_and_standard_masks_are_independent() {
        let mut perso = PersoInfo::default();
        let flags = EncryptionFlags { command: true, response: false };
        perso.set_encryption_flags(CommandCode::Extended(0x05), flags);

        assert_eq!(perso.encryption_flags(CommandCode::Extended(0x05)), flags);
        assert!(!perso.encryption_flags(CommandCode::READ).any());
    }

    #[test]
    fn from_records_overrides_defaults() {
        let records = [
            AuthorizationRecord {
                code: CommandCode::READ,
                access: AccessCondition::Admin,
                encryption: EncryptionFlags { command: false, response: true },
            },
            AuthorizationRecord {
                code: CommandCode::UPDATE,
                access: AccessCondition::Host,
                encryption: EncryptionFlags { command: true, response: false },
            },
        ];
        let perso = PersoInfo::from_records(&records);

        assert_eq!(perso.access_condition(CommandCode::READ), AccessCondition::Admin);
        assert!(perso.access_condition(CommandCode::READ).requires_session());
        assert!(perso.encryption_flags(CommandCode::READ).response);
        assert!(perso.encryption_flags(CommandCode::UPDATE).command);
        assert_eq!(perso.access_condition(CommandCode::ECHO), AccessCondition::Free);
    }
}
