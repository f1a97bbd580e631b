//! Frame elements: byte-range views that make up a frame.
//!
//! An element never copies caller data. It either views a caller buffer
//! (read-only for command fields, writable for response fields) or owns a
//! few bytes produced by the current call (header, length field, MAC tag,
//! CRC, filler, encryption scratch).

use crate::errors::{FrameError, Result};

/// Largest element the 16-bit length field can describe
pub const MAX_ELEMENT_LEN: usize = u16::MAX as usize;

#[derive(Debug)]
enum ElementData<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
    Mutable(&'a mut [u8]),
}

/// One field of a command or response body.
///
/// `len()` is the number of bytes the element currently contributes to the
/// frame. It starts at the buffer capacity and may be shrunk by the receive
/// path when the device answers with fewer bytes than the caller allocated.
#[derive(Debug)]
pub struct FrameElement<'a> {
    length: u16,
    data: ElementData<'a>,
}

impl<'a> FrameElement<'a> {
    /// Read-only view over caller data.
    pub fn borrowed(data: &'a [u8]) -> Result<Self> {
        let length = checked_len(data.len())?;
        Ok(Self { length, data: ElementData::Borrowed(data) })
    }

    /// Writable view over a caller buffer (response fields).
    pub fn mutable(data: &'a mut [u8]) -> Result<Self> {
        let length = checked_len(data.len())?;
        Ok(Self { length, data: ElementData::Mutable(data) })
    }

    /// Element owning its bytes.
    pub fn owned(data: Vec<u8>) -> Result<Self> {
        let length = checked_len(data.len())?;
        Ok(Self { length, data: ElementData::Owned(data) })
    }

    /// Owned element of `len` zero bytes (receive scratch, filler).
    pub fn zeroed(len: u16) -> Self {
        Self { length: len, data: ElementData::Owned(vec![0u8; usize::from(len)]) }
    }

    /// Owned single-byte element.
    pub fn byte(value: u8) -> Self {
        Self { length: 1, data: ElementData::Owned(vec![value]) }
    }

    /// Owned two-byte element, big-endian.
    pub fn word(value: u16) -> Self {
        Self { length: 2, data: ElementData::Owned(value.to_be_bytes().to_vec()) }
    }

    /// Bytes this element contributes to the frame.
    pub fn len(&self) -> usize {
        usize::from(self.length)
    }

    /// True when the element contributes no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Size of the underlying buffer.
    pub fn capacity(&self) -> usize {
        match &self.data {
            ElementData::Owned(v) => v.len(),
            ElementData::Borrowed(s) => s.len(),
            ElementData::Mutable(s) => s.len(),
        }
    }

    /// True when bytes can be written into this element.
    pub fn is_writable(&self) -> bool {
        !matches!(self.data, ElementData::Borrowed(_))
    }

    /// Current contents (`len()` bytes).
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.len();
        match &self.data {
            ElementData::Owned(v) => &v[..len],
            ElementData::Borrowed(s) => &s[..len],
            ElementData::Mutable(s) => &s[..len],
        }
    }

    /// Writable contents (`len()` bytes). `None` for read-only views.
    pub fn as_mut_bytes(&mut self) -> Option<&mut [u8]> {
        let len = self.len();
        match &mut self.data {
            ElementData::Owned(v) => Some(&mut v[..len]),
            ElementData::Borrowed(_) => None,
            ElementData::Mutable(s) => Some(&mut s[..len]),
        }
    }

    /// Shrink the element to at most `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.length = len as u16;
        }
    }

    /// Set the contributed length anywhere within the buffer capacity.
    ///
    /// Lengths past the capacity are clamped to it.
    pub fn set_len(&mut self, len: usize) {
        self.length = len.min(self.capacity()) as u16;
    }

    /// Whole writable buffer, ignoring the current length.
    pub(crate) fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            ElementData::Owned(v) => Some(v.as_mut_slice()),
            ElementData::Borrowed(_) => None,
            ElementData::Mutable(s) => Some(&mut s[..]),
        }
    }

    /// Reverse the element bytes in place.
    ///
    /// Converts multi-byte fields between device wire order and host order.
    pub fn swap_byte_order(&mut self) -> Result<()> {
        let bytes = self.as_mut_bytes().ok_or(FrameError::ReadOnlyElement { index: 0 })?;
        bytes.reverse();
        Ok(())
    }

    /// Copy the current contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

fn checked_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| FrameError::ElementTooLarge { size: len, max: MAX_ELEMENT_LEN })
}
