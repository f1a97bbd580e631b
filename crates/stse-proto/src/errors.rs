//! Error types for frame assembly and disassembly.
//!
//! All errors are structured, testable, and provide actionable information.

use thiserror::Error;

/// Errors raised while manipulating a [`crate::Frame`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Operation needs at least one element (the header)
    #[error("frame has no elements")]
    Empty,

    /// Element length does not fit the 16-bit length field
    #[error("element too large: {size} bytes exceeds maximum {max}")]
    ElementTooLarge {
        /// Actual element size
        size: usize,
        /// Maximum element size
        max: usize,
    },

    /// Frame total length would overflow the 16-bit length field
    #[error("frame length overflow: {length} bytes")]
    LengthOverflow {
        /// Total length that was computed
        length: usize,
    },

    /// Frame would exceed the 8-bit element counter
    #[error("too many elements in frame: {count}")]
    TooManyElements {
        /// Element count that was reached
        count: usize,
    },

    /// Bytes had to be written into an element that only views caller data
    #[error("element {index} is read-only")]
    ReadOnlyElement {
        /// Routing index of the element
        index: usize,
    },

    /// Strap position is not followed by any element
    #[error("cannot strap after element {after}: frame has {count} elements")]
    StrapOutOfRange {
        /// Element the strap was requested after
        after: usize,
        /// Number of logical elements in the frame
        count: usize,
    },

    /// Frame already routes through a strap
    #[error("frame is already strapped")]
    AlreadyStrapped,

    /// Buffer does not fit the elements it is scattered into
    #[error("scatter overflow: {size} bytes into {capacity} bytes of elements")]
    ScatterOverflow {
        /// Bytes to scatter
        size: usize,
        /// Combined capacity of the target elements
        capacity: usize,
    },
}

/// Convenient Result type alias for frame operations
pub type Result<T> = std::result::Result<T, FrameError>;
