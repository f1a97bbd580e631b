//! # STSE Protocol: Frame Model
//!
//! Byte-level building blocks shared by the host transport and the
//! secure-channel layer of the STSAFE middleware.
//!
//! ## Wire Format
//!
//! ```text
//! Command:   [header: 1|2] [payload ...] [CRC16 BE: 2]
//! Response:  [header: 1] [length BE: 2] [payload ...] [CRC16 BE: 2]
//! ```
//!
//! The response length field counts payload bytes only. The CRC covers the
//! header and payload, never the length field.
//!
//! ## Implementation Notes
//!
//! - **Zero-Copy Frames**: a [`Frame`] is a list of [`FrameElement`] views
//!   over caller buffers. Building a command never copies its fields; a
//!   response is received straight into the caller's field buffers.
//!
//! - **Straps Without Pointer Surgery**: encryption swaps the payload fields
//!   for one ciphertext buffer through an explicit routing state on the
//!   frame. Unstrapping restores the exact original elements.
//!
//! - **Pluggable CRC**: the frame layer folds any [`Crc16`] engine over its
//!   elements; [`X25`] is the software engine.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod crc;
pub mod element;
pub mod errors;
pub mod frame;
pub mod header;
pub mod status;

pub use crc::{Crc16, X25};
pub use element::{FrameElement, MAX_ELEMENT_LEN};
pub use errors::{FrameError, Result};
pub use frame::{Frame, MAX_ELEMENTS};
pub use header::{CODE_MASK, CommandCode, CommandHeader, EXTENDED_PREFIX, HeaderFlags, ResponseHeader};
pub use status::DeviceStatus;

/// Size of the CRC trailer
pub const CRC_SIZE: usize = 2;

/// Size of the response length field
pub const LENGTH_SIZE: usize = 2;
