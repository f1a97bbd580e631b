//! Frame model: an ordered list of elements routed onto the wire.
//!
//! A `Frame` describes a command or response body as a list of fields
//! without copying caller buffers. The transport serializes the elements in
//! routing order.
//!
//! # Straps
//!
//! Encryption replaces every field after the header by one contiguous
//! ciphertext buffer while the caller still owns the original field layout.
//! Instead of relinking elements, the frame switches to strapped routing:
//! the strap body is serialized in place of the
//! elements it covers and [`Frame::unstrap`] goes back to the logical list.
//! The covered elements are never touched while strapped.
//!
//! ```text
//! Logical:   [hdr] [f1] [f2] [f3] [mac]
//! Strapped:  [hdr] [   body      ] [mac]      (f1..f3 kept aside)
//! ```

use crate::{
    Crc16,
    element::FrameElement,
    errors::{FrameError, Result},
};

/// Largest number of elements the 8-bit element counter can describe
pub const MAX_ELEMENTS: usize = u8::MAX as usize;

/// Physical buffer standing in for the elements that follow `after`.
#[derive(Debug)]
struct Strap<'a> {
    after: usize,
    span: usize,
    body: FrameElement<'a>,
}

/// How the frame's elements are serialized.
#[derive(Debug, Default)]
enum Routing<'a> {
    /// Every element in order
    #[default]
    Logical,
    /// Elements `after + 1 .. after + 1 + span` are replaced by the strap body
    Strapped(Strap<'a>),
}

/// Command or response body.
///
/// # Invariants
///
/// - `len()` equals the sum of the lengths of the routed elements, and
///   `element_count()` their number. Both are maintained by `push`/`pop` and
///   recomputed by [`Frame::update`] and [`Frame::unstrap`].
/// - Elements are added and removed at the tail only. Elements pushed while
///   strapped follow the strap body.
#[derive(Debug, Default)]
pub struct Frame<'a> {
    elements: Vec<FrameElement<'a>>,
    routing: Routing<'a>,
    element_count: usize,
    length: usize,
}

impl<'a> Frame<'a> {
    /// Empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame holding `elements` in order.
    pub fn from_elements(elements: impl IntoIterator<Item = FrameElement<'a>>) -> Result<Self> {
        let mut frame = Self::new();
        for element in elements {
            frame.push(element)?;
        }
        Ok(frame)
    }

    /// Total routed length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// True when no bytes are routed.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of routed elements.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Routed length as carried by the 16-bit wire length field.
    pub fn wire_len(&self) -> Result<u16> {
        u16::try_from(self.length).map_err(|_| FrameError::LengthOverflow { length: self.length })
    }

    /// True while a strap body replaces part of the logical layout.
    pub fn is_strapped(&self) -> bool {
        matches!(self.routing, Routing::Strapped(_))
    }

    /// Append an element at the tail.
    pub fn push(&mut self, element: FrameElement<'a>) -> Result<()> {
        if self.element_count >= MAX_ELEMENTS {
            return Err(FrameError::TooManyElements { count: self.element_count + 1 });
        }

        self.length += element.len();
        self.element_count += 1;
        self.elements.push(element);
        Ok(())
    }

    /// Remove the tail element.
    ///
    /// Returns `None` on an empty frame, and when the tail is covered by a
    /// strap (strapped elements only come back through [`Frame::unstrap`]).
    pub fn pop(&mut self) -> Option<FrameElement<'a>> {
        if let Routing::Strapped(strap) = &self.routing
            && self.elements.len() <= strap.after + 1 + strap.span
        {
            return None;
        }

        let element = self.elements.pop()?;
        self.length -= element.len();
        self.element_count -= 1;
        Some(element)
    }

    /// Route `body` right after element `after`, in place of every element
    /// that currently follows it.
    pub fn insert_strap(&mut self, after: usize, body: FrameElement<'a>) -> Result<()> {
        if self.is_strapped() {
            return Err(FrameError::AlreadyStrapped);
        }
        if after >= self.elements.len() {
            return Err(FrameError::StrapOutOfRange { after, count: self.elements.len() });
        }

        let span = self.elements.len() - after - 1;
        self.routing = Routing::Strapped(Strap { after, span, body });
        self.update();
        Ok(())
    }

    /// Restore the logical layout and hand back the strap body.
    pub fn unstrap(&mut self) -> Option<FrameElement<'a>> {
        let Routing::Strapped(strap) = std::mem::take(&mut self.routing) else {
            return None;
        };
        self.update();
        Some(strap.body)
    }

    /// Recompute `len()` and `element_count()` from the routing.
    pub fn update(&mut self) {
        let (count, length) =
            self.routed().fold((0usize, 0usize), |(count, length), e| (count + 1, length + e.len()));
        self.element_count = count;
        self.length = length;
    }

    /// Elements in routing order.
    pub fn routed(&self) -> impl Iterator<Item = &FrameElement<'a>> {
        let (head, body, tail) = match &self.routing {
            Routing::Logical => (self.elements.as_slice(), None, &[][..]),
            Routing::Strapped(strap) => (
                &self.elements[..=strap.after],
                Some(&strap.body),
                &self.elements[strap.after + 1 + strap.span..],
            ),
        };
        head.iter().chain(body).chain(tail.iter())
    }

    /// Mutable elements in routing order.
    pub fn routed_mut(&mut self) -> Vec<&mut FrameElement<'a>> {
        let Self { elements, routing, .. } = self;
        match routing {
            Routing::Logical => elements.iter_mut().collect(),
            Routing::Strapped(strap) => {
                let (head, rest) = elements.split_at_mut(strap.after + 1);
                let tail = &mut rest[strap.span..];
                head.iter_mut()
                    .chain(std::iter::once(&mut strap.body))
                    .chain(tail.iter_mut())
                    .collect()
            },
        }
    }

    /// Elements in logical order, strapped or not.
    pub fn elements(&self) -> &[FrameElement<'a>] {
        &self.elements
    }

    /// First element (the header).
    pub fn first(&self) -> Option<&FrameElement<'a>> {
        self.elements.first()
    }

    /// First element, writable.
    pub fn first_mut(&mut self) -> Option<&mut FrameElement<'a>> {
        self.elements.first_mut()
    }

    /// Routed bytes following the header, concatenated.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length);
        for element in self.routed().skip(1) {
            out.extend_from_slice(element.as_bytes());
        }
        out
    }

    /// Routed bytes, concatenated.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length);
        for element in self.routed() {
            out.extend_from_slice(element.as_bytes());
        }
        out
    }

    /// CRC16 over the routed elements, skipping empty ones.
    pub fn crc16<C: Crc16 + ?Sized>(&self, engine: &C) -> u16 {
        let mut crc: Option<u16> = None;
        for element in self.routed().filter(|e| !e.is_empty()) {
            crc = Some(match crc {
                None => engine.crc16_calculate(element.as_bytes()),
                Some(acc) => engine.crc16_accumulate(acc, element.as_bytes()),
            });
        }
        crc.unwrap_or_else(|| engine.crc16_calculate(&[]))
    }

    /// Copy `bytes` field by field into the logical elements starting at
    /// `start`.
    ///
    /// Each element is filled up to its buffer capacity; elements past the
    /// end of `bytes` are shrunk (down to zero length). Fails with
    /// [`FrameError::AlreadyStrapped`] unless the frame is in its logical
    /// layout, and with [`FrameError::ReadOnlyElement`] before any byte is
    /// written if a read-only element would receive data.
    pub fn scatter(&mut self, start: usize, bytes: &[u8]) -> Result<()> {
        if self.is_strapped() {
            return Err(FrameError::AlreadyStrapped);
        }

        let capacity: usize = self.elements.iter().skip(start).map(FrameElement::capacity).sum();
        if bytes.len() > capacity {
            return Err(FrameError::ScatterOverflow { size: bytes.len(), capacity });
        }

        let mut pending = bytes.len();
        for (index, element) in self.elements.iter().enumerate().skip(start) {
            if pending == 0 {
                break;
            }
            let take = pending.min(element.capacity());
            if take > 0 && !element.is_writable() {
                return Err(FrameError::ReadOnlyElement { index });
            }
            pending -= take;
        }

        let mut remaining = bytes;
        for (index, element) in self.elements.iter_mut().enumerate().skip(start) {
            let take = remaining.len().min(element.capacity());
            if take > 0 {
                let buffer =
                    element.buffer_mut().ok_or(FrameError::ReadOnlyElement { index })?;
                buffer[..take].copy_from_slice(&remaining[..take]);
            }
            element.set_len(take);
            remaining = &remaining[take..];
        }

        self.update();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::X25;

    fn sample_frame<'a>(a: &'a [u8], b: &'a [u8]) -> Frame<'a> {
        Frame::from_elements([
            FrameElement::byte(0x14),
            FrameElement::borrowed(a).unwrap(),
            FrameElement::borrowed(b).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn push_and_pop_track_length() {
        let mut frame = Frame::new();
        frame.push(FrameElement::byte(0x00)).unwrap();
        frame.push(FrameElement::word(0x1234)).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.element_count(), 2);

        let popped = frame.pop().unwrap();
        assert_eq!(popped.as_bytes(), &[0x12, 0x34]);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.element_count(), 1);
    }

    #[test]
    fn strap_replaces_following_elements() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5];
        let mut frame = sample_frame(&a, &b);

        frame.insert_strap(0, FrameElement::owned(vec![0xEE; 16]).unwrap()).unwrap();

        assert!(frame.is_strapped());
        assert_eq!(frame.element_count(), 2);
        assert_eq!(frame.len(), 17);
        assert_eq!(frame.payload_bytes(), vec![0xEE; 16]);
    }

    #[test]
    fn elements_pushed_while_strapped_follow_the_body() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5];
        let mut frame = sample_frame(&a, &b);
        frame.insert_strap(0, FrameElement::zeroed(16)).unwrap();

        frame.push(FrameElement::owned(vec![0xAA; 4]).unwrap()).unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 21);
        assert_eq!(&bytes[17..], &[0xAA; 4]);

        // The pushed element pops, the strapped ones do not
        assert!(frame.pop().is_some());
        assert!(frame.pop().is_none());
    }

    #[test]
    fn unstrap_restores_logical_layout() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5];
        let mut frame = sample_frame(&a, &b);
        let before = frame.to_bytes();

        frame.insert_strap(0, FrameElement::zeroed(16)).unwrap();
        let body = frame.unstrap().unwrap();

        assert_eq!(body.len(), 16);
        assert_eq!(frame.to_bytes(), before);
        assert_eq!(frame.element_count(), 3);
        assert!(frame.unstrap().is_none());
    }

    #[test]
    fn double_strap_is_rejected() {
        let a = [1u8];
        let b = [2u8];
        let mut frame = sample_frame(&a, &b);
        frame.insert_strap(0, FrameElement::zeroed(16)).unwrap();
        assert_eq!(
            frame.insert_strap(0, FrameElement::zeroed(16)),
            Err(FrameError::AlreadyStrapped)
        );
    }

    #[test]
    fn strap_out_of_range_is_rejected() {
        let mut frame = Frame::from_elements([FrameElement::byte(0)]).unwrap();
        assert!(matches!(
            frame.insert_strap(1, FrameElement::zeroed(16)),
            Err(FrameError::StrapOutOfRange { after: 1, count: 1 })
        ));
    }

    #[test]
    fn crc_is_independent_of_element_split() {
        let whole = b"123456789";
        let frame = Frame::from_elements([FrameElement::borrowed(whole).unwrap()]).unwrap();

        let split = Frame::from_elements([
            FrameElement::borrowed(&whole[..4]).unwrap(),
            FrameElement::borrowed(&[]).unwrap(),
            FrameElement::borrowed(&whole[4..]).unwrap(),
        ])
        .unwrap();

        assert_eq!(frame.crc16(&X25), 0x906E);
        assert_eq!(split.crc16(&X25), 0x906E);
    }

    #[test]
    fn scatter_fills_fields_and_shrinks_the_rest() {
        let mut f1 = [0u8; 2];
        let mut f2 = [0u8; 4];
        let mut frame = Frame::from_elements([
            FrameElement::byte(0x00),
            FrameElement::mutable(&mut f1).unwrap(),
            FrameElement::mutable(&mut f2).unwrap(),
        ])
        .unwrap();

        frame.scatter(1, &[9, 8, 7]).unwrap();
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.elements()[2].as_bytes(), &[7]);

        drop(frame);
        assert_eq!(f1, [9, 8]);
        assert_eq!(f2, [7, 0, 0, 0]);
    }

    #[test]
    fn scatter_rejects_overflow_and_read_only_targets() {
        let a = [0u8; 2];
        let mut frame =
            Frame::from_elements([FrameElement::byte(0), FrameElement::borrowed(&a).unwrap()])
                .unwrap();

        assert!(matches!(frame.scatter(1, &[1, 2, 3]), Err(FrameError::ScatterOverflow { .. })));
        assert_eq!(frame.scatter(1, &[1]), Err(FrameError::ReadOnlyElement { index: 1 }));
    }

    #[test]
    fn scatter_leaves_frame_untouched_when_a_later_target_is_read_only() {
        let mut writable = [0u8; 2];
        let fixed = [5u8; 2];
        let mut frame = Frame::from_elements([
            FrameElement::byte(0x00),
            FrameElement::mutable(&mut writable).unwrap(),
            FrameElement::borrowed(&fixed).unwrap(),
        ])
        .unwrap();

        assert_eq!(frame.scatter(1, &[1, 2, 3]), Err(FrameError::ReadOnlyElement { index: 2 }));
        assert_eq!(frame.len(), 5);
        assert_eq!(frame.elements()[1].len(), 2);

        // data ending before the read-only element is fine
        frame.scatter(1, &[1]).unwrap();
        assert_eq!(frame.len(), 2);

        drop(frame);
        assert_eq!(writable, [1, 0]);
    }
}
