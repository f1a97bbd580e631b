//! Crypto platform interface consumed by the secure channel.
//!
//! The secure channel never implements AES itself. Targets plug in whatever
//! they have (hardware accelerator, vendor library, or [`crate::SoftwareCrypto`])
//! by implementing [`CryptoPlatform`].

use stse_proto::Crc16;

use crate::{AesKey, error::CryptoError};

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Incremental AES-CMAC computation.
pub trait CmacContext {
    /// Feed more message bytes.
    fn append(&mut self, data: &[u8]);

    /// Finish and write the left-most `tag.len()` bytes of the MAC.
    fn compute_finish(self, tag: &mut [u8]) -> Result<(), CryptoError>;

    /// Finish and compare the left-most `tag.len()` bytes against `tag`.
    ///
    /// Implementations must compare in constant time.
    fn verify_finish(self, tag: &[u8]) -> bool;
}

/// Symmetric primitives and CRC supplied by the platform.
pub trait CryptoPlatform: Crc16 {
    /// CMAC state produced by [`CryptoPlatform::aes_cmac_init`]
    type Cmac: CmacContext;

    /// Encrypt one block in place (AES-ECB).
    fn aes_ecb_encrypt(
        &self,
        key: &AesKey,
        block: &mut [u8; AES_BLOCK_SIZE],
    ) -> Result<(), CryptoError>;

    /// Encrypt whole blocks in place (AES-CBC, no padding).
    fn aes_cbc_encrypt(
        &self,
        key: &AesKey,
        iv: &[u8; AES_BLOCK_SIZE],
        data: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Decrypt whole blocks in place (AES-CBC, no padding).
    fn aes_cbc_decrypt(
        &self,
        key: &AesKey,
        iv: &[u8; AES_BLOCK_SIZE],
        data: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Start an AES-CMAC computation.
    fn aes_cmac_init(&self, key: &AesKey) -> Result<Self::Cmac, CryptoError>;
}
