//! Fuzz target for device responses
//!
//! Hostile or glitching devices control every byte the host reads back.
//!
//! # Strategy
//!
//! - Raw responses: arbitrary header, length and body bytes fed through the
//!   chunked receive path
//! - Query records: arbitrary host key slot and authorization payloads
//!
//! # Invariants
//!
//! - Oversized declared lengths return `BufferLengthExceeded`
//! - The response frame keeps its element count after every receive
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stse_core::{
    Bus, BusError, CommandAuthorization, DeviceHandle, DeviceType, Environment, HostKeyQuery,
    HostKeySlot, StseError,
};
use stse_crypto::SoftwareCrypto;
use stse_proto::{Frame, FrameElement};

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    response: Vec<u8>,
    field_sizes: Vec<u8>,
    record: Vec<u8>,
}

struct ReplayBus {
    response: Vec<u8>,
    cursor: usize,
}

impl Bus for ReplayBus {
    fn send_start(&mut self, _length: u16) -> Result<(), BusError> {
        Ok(())
    }

    fn send_continue(&mut self, _data: &[u8]) -> Result<(), BusError> {
        Ok(())
    }

    fn send_stop(&mut self, _data: &[u8]) -> Result<(), BusError> {
        Ok(())
    }

    fn recv_start(&mut self, _length: u16) -> Result<(), BusError> {
        self.cursor = 0;
        Ok(())
    }

    fn recv_continue(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        for byte in buf.iter_mut() {
            *byte = self.response.get(self.cursor).copied().unwrap_or(0);
            self.cursor += 1;
        }
        Ok(())
    }

    fn recv_stop(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.recv_continue(buf)
    }
}

struct NoDelay;

impl Environment for NoDelay {
    fn delay(&self, _duration: std::time::Duration) {}
}

fuzz_target!(|input: Input| {
    let bus = ReplayBus { response: input.response, cursor: 0 };
    let mut handle = DeviceHandle::new(DeviceType::StsafeA110, bus, SoftwareCrypto, NoDelay);

    let mut rsp = Frame::new();
    let _ = rsp.push(FrameElement::byte(0));
    for size in input.field_sizes.iter().take(16) {
        let _ = rsp.push(FrameElement::zeroed(u16::from(*size)));
    }
    let count = rsp.element_count();

    if let Err(StseError::BufferLengthExceeded { declared, max }) = handle.receive(&mut rsp) {
        assert!(declared > max);
    }
    assert_eq!(rsp.element_count(), count);

    let _ = HostKeySlot::parse(HostKeyQuery::V1, &input.record);
    let _ = HostKeySlot::parse(HostKeyQuery::V2, &input.record);
    let _ = CommandAuthorization::parse(&input.record);
});
