//! Symmetric key material.

use std::fmt;

use zeroize::Zeroize;

use crate::error::CryptoError;

/// AES key size supported by the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// 16-byte key
    Aes128,
    /// 32-byte key
    Aes256,
}

impl KeyType {
    /// Key length in bytes.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }
}

/// AES key, zeroized on drop.
#[derive(Clone)]
pub struct AesKey {
    key_type: KeyType,
    bytes: [u8; 32],
}

impl AesKey {
    /// Key from raw bytes; the length selects the key type.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key_type = match bytes.len() {
            16 => KeyType::Aes128,
            32 => KeyType::Aes256,
            len => return Err(CryptoError::InvalidKeyLength { len }),
        };
        let mut key = Self { key_type, bytes: [0u8; 32] };
        key.bytes[..bytes.len()].copy_from_slice(bytes);
        Ok(key)
    }

    /// AES-128 key.
    #[must_use]
    pub fn aes128(bytes: [u8; 16]) -> Self {
        let mut key = Self { key_type: KeyType::Aes128, bytes: [0u8; 32] };
        key.bytes[..16].copy_from_slice(&bytes);
        key
    }

    /// AES-256 key.
    #[must_use]
    pub fn aes256(bytes: [u8; 32]) -> Self {
        Self { key_type: KeyType::Aes256, bytes }
    }

    /// Key size.
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Raw key bytes (16 or 32).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.key_type.key_len()]
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesKey").field("key_type", &self.key_type).finish_non_exhaustive()
    }
}

// Implement Drop to zeroize key material
impl Drop for AesKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
