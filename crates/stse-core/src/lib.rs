//! # STSE Core: Host Stack for STSAFE Secure Elements
//!
//! Drives a secure element over a half-duplex bus: frames go out in chunked
//! bus transactions with a CRC trailer, responses are polled for, and
//! commands the device personalization protects are authenticated and
//! encrypted under a host session.
//!
//! ## Layers
//!
//! ```text
//! DeviceHandle::transfer            dispatch on access condition / encryption flags
//!   ├─ encrypted_transfer           AES-CBC payloads, strapped into the frames
//!   │   └─ authenticated_transfer   C-MAC on the command, R-MAC on the response
//!   │       └─ raw_transfer         transmit, inter-frame delay, receive
//!   └─ raw_transfer
//! ```
//!
//! ## Collaborators
//!
//! The handle is generic over the three things that differ per target:
//!
//! - [`Bus`]: the chunked bus driver
//! - [`CryptoPlatform`](stse_crypto::CryptoPlatform): AES, CMAC and CRC
//! - [`Environment`]: blocking delays (virtual time in tests)
//!
//! ## Concurrency
//!
//! Strictly synchronous. Every operation takes `&mut self` and blocks on the
//! bus; callers sharing a device serialize access themselves.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bus;
pub mod device;
pub mod encryption;
pub mod env;
pub mod error;
pub mod handle;
pub mod mac;
pub mod perso;
pub mod query;
pub mod session;
pub mod transport;

pub use bus::{Bus, BusError};
pub use device::{CounterWidth, DeviceType, HostKeyQuery};
pub use env::{Environment, SystemEnv};
pub use error::StseError;
pub use handle::DeviceHandle;
pub use mac::MAC_SIZE;
pub use perso::{AccessCondition, AuthorizationRecord, EncryptionFlags, PersoInfo};
pub use query::{CommandAuthorization, HostKeySlot};
pub use session::{HostSession, KekSession, Session};
pub use transport::{DelayPolicy, MAX_RESPONSE_LENGTH, TransportConfig};
