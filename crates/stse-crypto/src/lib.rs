//! STSE Cryptographic Platform
//!
//! Symmetric building blocks for the STSAFE secure channel. The channel
//! consumes them through [`CryptoPlatform`] so targets can substitute a
//! hardware accelerator; [`SoftwareCrypto`] is the portable implementation.
//!
//! # Primitives
//!
//! - AES-ECB single block: derives CBC IVs from the session counter
//! - AES-CBC without padding: command/response payload encryption (the
//!   channel applies its own `0x80 00..` padding)
//! - AES-CMAC, incremental, with truncated verification: C-MAC and R-MAC
//! - CRC-16/X-25: frame checksum (via [`stse_proto::Crc16`])
//!
//! # Security
//!
//! - Key material lives in [`AesKey`], zeroized on drop
//! - MAC verification is delegated to constant-time comparisons
//! - Working KEKs are derived with HKDF-SHA256 and never stored in the
//!   session

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod kek;
pub mod key;
pub mod platform;
pub mod software;

pub use error::CryptoError;
pub use kek::derive_working_kek;
pub use key::{AesKey, KeyType};
pub use platform::{AES_BLOCK_SIZE, CmacContext, CryptoPlatform};
pub use software::{SoftwareCmac, SoftwareCrypto};
