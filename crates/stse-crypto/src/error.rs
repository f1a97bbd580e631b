//! Errors raised by crypto platforms.

use thiserror::Error;

/// Errors from the crypto platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material is neither 16 nor 32 bytes
    #[error("invalid AES key length: {len} bytes")]
    InvalidKeyLength {
        /// Length that was supplied
        len: usize,
    },

    /// Block-mode input is not a whole number of AES blocks
    #[error("data length {len} is not a multiple of the AES block size")]
    InvalidDataLength {
        /// Length that was supplied
        len: usize,
    },

    /// Requested MAC tag is longer than the CMAC output
    #[error("tag length {len} exceeds CMAC output size")]
    TagTooLong {
        /// Length that was requested
        len: usize,
    },

    /// Platform-specific failure (hardware accelerator, driver)
    #[error("crypto platform failure: {0}")]
    Platform(String),
}
