//! Fuzz target for frame bookkeeping under arbitrary operation sequences
//!
//! # Strategy
//!
//! - Push/pop: empty elements, large elements, pops past a strap
//! - Straps: valid and out-of-range positions, double straps, unstrap
//!   without strap
//! - Scatter: buffers shorter than, equal to and longer than the capacity
//!
//! # Invariants
//!
//! - `len()` always equals the sum of the routed element lengths
//! - `element_count()` always equals the number of routed elements
//! - The CRC folded over elements equals the CRC of `to_bytes()`
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stse_proto::{Crc16, Frame, FrameElement, X25};

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    PushBytes(Vec<u8>),
    PushZeroed(u8),
    Pop,
    Strap { after: u8, body_len: u8 },
    Unstrap,
    Scatter { start: u8, bytes: Vec<u8> },
}

fuzz_target!(|ops: Vec<Operation>| {
    let mut frame = Frame::new();

    for op in ops.into_iter().take(256) {
        match op {
            Operation::PushBytes(bytes) => {
                if let Ok(element) = FrameElement::owned(bytes) {
                    let _ = frame.push(element);
                }
            },
            Operation::PushZeroed(len) => {
                let _ = frame.push(FrameElement::zeroed(u16::from(len)));
            },
            Operation::Pop => {
                let _ = frame.pop();
            },
            Operation::Strap { after, body_len } => {
                let _ = frame.insert_strap(usize::from(after), FrameElement::zeroed(u16::from(body_len)));
            },
            Operation::Unstrap => {
                let _ = frame.unstrap();
            },
            Operation::Scatter { start, bytes } => {
                let _ = frame.scatter(usize::from(start), &bytes);
            },
        }

        let routed: Vec<usize> = frame.routed().map(FrameElement::len).collect();
        assert_eq!(frame.len(), routed.iter().sum::<usize>());
        assert_eq!(frame.element_count(), routed.len());
        assert_eq!(frame.crc16(&X25), X25.crc16_calculate(&frame.to_bytes()));
    }
});
