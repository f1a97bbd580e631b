//! Chunked frame transport with CRC and bounded retry.
//!
//! A command frame goes out as one bus write: CRC appended as a trailing
//! element, `send_start` with the total length, one `send_continue` per
//! non-empty element and `send_stop` for the CRC.
//!
//! A response needs two read cycles. The first reads the header and the
//! length field; the second re-reads the whole frame into the caller's
//! elements, shrinking them to the declared length and routing any surplus
//! into a filler element so the CRC still covers every byte the device sent.
//!
//! ```text
//! cycle 1:  [header] [length]
//! cycle 2:  [header] [length] [field 0] ... [field n] [filler] [CRC]
//! ```
//!
//! The device NACKs while busy, so every bus cycle is retried on transient
//! errors with a fixed delay until the retry budget runs out.

use std::time::Duration;

use stse_crypto::CryptoPlatform;
use stse_proto::{
    CRC_SIZE, CommandHeader, Frame, FrameElement, FrameError, LENGTH_SIZE, MAX_ELEMENTS, ResponseHeader,
};

use crate::{
    bus::{Bus, BusError},
    env::Environment,
    error::StseError,
    handle::DeviceHandle,
};

/// Largest response payload accepted from a device.
pub const MAX_RESPONSE_LENGTH: usize = 1024;

/// Default number of attempts per bus cycle.
pub const DEFAULT_RETRY_BUDGET: u16 = 100;

/// Default delay between two attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Default delay between sending a command and the first poll.
pub const DEFAULT_FIRST_POLL: Duration = Duration::from_millis(1);

/// How long to wait between command and response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    /// Fixed delay, then rely on polling
    FirstPoll(Duration),
    /// The command's entry in the device execution-time table
    ExecutionTime,
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Attempts per bus cycle before giving up (at least one is made)
    pub retry_budget: u16,
    /// Delay after a transient bus error
    pub retry_delay: Duration,
    /// Inter-frame delay policy
    pub delay_policy: DelayPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_delay: DEFAULT_RETRY_DELAY,
            delay_policy: DelayPolicy::FirstPoll(DEFAULT_FIRST_POLL),
        }
    }
}

impl<B: Bus, C: CryptoPlatform, E: Environment> DeviceHandle<B, C, E> {
    /// Send a command frame.
    ///
    /// The CRC element is removed again before returning, whatever the
    /// outcome, so `frame` is left as the caller built it.
    ///
    /// # Errors
    ///
    /// - `StseError::Frame` if the frame is empty or too long
    /// - `StseError::Bus` if the bus still fails after the retry budget
    pub fn transmit(&mut self, frame: &mut Frame<'_>) -> Result<(), StseError> {
        if frame.element_count() == 0 {
            return Err(FrameError::Empty.into());
        }

        let crc = frame.crc16(&self.crypto);
        frame.push(FrameElement::word(crc))?;

        let result = match frame.wire_len() {
            Ok(total) => {
                let frame = &*frame;
                self.with_retries("transmit", |bus| send_elements(bus, frame, total))
            },
            Err(e) => Err(e.into()),
        };

        frame.pop();
        result
    }

    /// Receive a response frame into `frame`.
    ///
    /// The first element receives the response header; the remaining
    /// elements receive the payload in order and are shrunk to what the
    /// device actually sent.
    ///
    /// # Errors
    ///
    /// - `StseError::BufferLengthExceeded` if the device announces an
    ///   oversized payload
    /// - `StseError::Crc` on a CRC mismatch
    /// - `StseError::Device` if the device status is not OK
    /// - `StseError::Bus` if the bus still fails after the retry budget
    /// - `StseError::Frame` if the frame has no writable one-byte header
    pub fn receive(&mut self, frame: &mut Frame<'_>) -> Result<(), StseError> {
        self.receive_with_trailer(frame, 0)
    }

    /// Receive into `frame` whose last `trailer` elements are fixed-size
    /// fields closing the payload (the R-MAC).
    ///
    /// Trailer elements are filled from the end of the declared payload, so
    /// a reply shorter than the caller's fields still lands its trailer in
    /// place. The variable part shrinks and any surplus goes to a filler
    /// routed between the variable part and the trailer. If the bus gives
    /// up mid-frame, every element gets its length back.
    pub(crate) fn receive_with_trailer(
        &mut self,
        frame: &mut Frame<'_>,
        trailer: usize,
    ) -> Result<(), StseError> {
        check_response_layout(frame)?;
        if trailer >= frame.element_count() {
            return Err(StseError::InvalidParameter("response trailer covers the header"));
        }
        if frame.element_count() + 2 > MAX_ELEMENTS {
            return Err(FrameError::TooManyElements { count: frame.element_count() + 2 }.into());
        }

        let mut header = [0u8; ResponseHeader::SIZE];
        let mut length = [0u8; LENGTH_SIZE];
        self.with_retries("receive length", |bus| {
            bus.recv_start((ResponseHeader::SIZE + LENGTH_SIZE) as u16)?;
            bus.recv_continue(&mut header)?;
            bus.recv_stop(&mut length)
        })?;

        let declared = usize::from(u16::from_be_bytes(length));
        if declared > MAX_RESPONSE_LENGTH {
            tracing::warn!(declared, max = MAX_RESPONSE_LENGTH, "response length exceeds maximum");
            return Err(StseError::BufferLengthExceeded { declared, max: MAX_RESPONSE_LENGTH });
        }

        let tail = pop_trailer(frame, trailer)?;
        let trailer_len: usize = tail.iter().map(FrameElement::len).sum();
        let budget = ReceiveBudget {
            variable: declared.saturating_sub(trailer_len),
            trailer: declared.min(trailer_len),
            trailer_start: frame.element_count() + 1,
        };

        let capacity = frame.len() - ResponseHeader::SIZE;
        let filler = budget.variable.saturating_sub(capacity) as u16;
        frame.push(FrameElement::zeroed(filler))?;
        push_trailer(frame, tail)?;
        frame.push(FrameElement::zeroed(CRC_SIZE as u16))?;

        let lengths: Vec<usize> = frame.routed().map(FrameElement::len).collect();
        let total = (ResponseHeader::SIZE + LENGTH_SIZE + declared + CRC_SIZE) as u16;
        let received = self.with_retries("receive frame", |bus| recv_elements(bus, frame, total, budget));
        if received.is_err() {
            for (element, len) in frame.routed_mut().into_iter().zip(lengths) {
                element.set_len(len);
            }
        }
        frame.update();

        let crc = frame.pop();
        let computed = frame.crc16(&self.crypto);
        let tail = pop_trailer(frame, trailer)?;
        frame.pop();
        push_trailer(frame, tail)?;
        received?;

        let received = crc.map_or(0, |e| match e.as_bytes() {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        });
        if received != computed {
            tracing::warn!(received, computed, "response CRC mismatch");
            return Err(StseError::Crc { received, computed });
        }

        let status = response_header(frame).status();
        if status.is_ok() { Ok(()) } else { Err(StseError::Device(status)) }
    }

    /// Send `cmd`, wait the inter-frame delay, receive into `rsp`.
    ///
    /// # Errors
    ///
    /// Any error of [`Self::transmit`] or [`Self::receive`].
    pub fn raw_transfer(&mut self, cmd: &mut Frame<'_>, rsp: &mut Frame<'_>) -> Result<(), StseError> {
        self.exchange(cmd, rsp, 0)
    }

    /// [`Self::raw_transfer`] with `trailer` fixed-size elements closing
    /// the response.
    pub(crate) fn exchange(
        &mut self,
        cmd: &mut Frame<'_>,
        rsp: &mut Frame<'_>,
        trailer: usize,
    ) -> Result<(), StseError> {
        let delay = self.inter_frame_delay(cmd)?;

        self.transmit(cmd)?;
        self.env.delay(delay);
        let result = self.receive_with_trailer(rsp, trailer);

        tracing::debug!(
            command_len = cmd.len(),
            response_len = rsp.len(),
            ok = result.is_ok(),
            "raw transfer"
        );
        result
    }

    /// Delay between the end of `cmd` and the first response poll.
    ///
    /// # Errors
    ///
    /// `StseError::Frame` if `cmd` has no parseable header.
    pub fn inter_frame_delay(&self, cmd: &Frame<'_>) -> Result<Duration, StseError> {
        let header = cmd
            .first()
            .and_then(|e| CommandHeader::parse(e.as_bytes()))
            .ok_or(FrameError::Empty)?;

        Ok(match self.config.delay_policy {
            DelayPolicy::FirstPoll(delay) => delay,
            DelayPolicy::ExecutionTime => self.device_type.execution_time(header.code),
        })
    }

    /// Run one bus cycle, retrying transient errors within the budget.
    pub(crate) fn with_retries<T>(
        &mut self,
        operation: &'static str,
        mut cycle: impl FnMut(&mut B) -> Result<T, BusError>,
    ) -> Result<T, StseError> {
        let budget = self.config.retry_budget.max(1);
        let mut attempts = 0u16;

        loop {
            attempts += 1;
            match cycle(&mut self.bus) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < budget => {
                    tracing::debug!(operation, attempts, error = %e, "bus cycle failed, retrying");
                    self.env.delay(self.config.retry_delay);
                },
                Err(e) => {
                    tracing::warn!(operation, attempts, error = %e, "bus cycle failed");
                    return Err(StseError::Bus { source: e, attempts });
                },
            }
        }
    }
}

fn send_elements<B: Bus>(bus: &mut B, frame: &Frame<'_>, total: u16) -> Result<(), BusError> {
    bus.send_start(total)?;

    let last = frame.element_count() - 1;
    for (index, element) in frame.routed().enumerate() {
        if index == last {
            bus.send_stop(element.as_bytes())?;
        } else if !element.is_empty() {
            bus.send_continue(element.as_bytes())?;
        }
    }
    Ok(())
}

/// How the declared payload splits between the variable elements and the
/// trailer.
#[derive(Debug, Clone, Copy)]
struct ReceiveBudget {
    variable: usize,
    trailer: usize,
    /// Routed index of the first trailer element
    trailer_start: usize,
}

fn recv_elements<B: Bus>(
    bus: &mut B,
    frame: &mut Frame<'_>,
    total: u16,
    budget: ReceiveBudget,
) -> Result<(), BusError> {
    let mut elements = frame.routed_mut();
    let last = elements.len() - 1;
    let mut discarded_length = [0u8; LENGTH_SIZE];
    let mut variable = budget.variable;
    let mut trailer = budget.trailer;

    bus.recv_start(total)?;
    for (index, element) in elements.iter_mut().enumerate() {
        if index == 0 {
            bus.recv_continue(element.as_mut_bytes().unwrap_or_default())?;
            bus.recv_continue(&mut discarded_length)?;
        } else if index == last {
            bus.recv_stop(element.as_mut_bytes().unwrap_or_default())?;
        } else {
            let remaining = if index < budget.trailer_start { &mut variable } else { &mut trailer };
            element.truncate(*remaining);
            *remaining -= element.len();
            if !element.is_empty() {
                bus.recv_continue(element.as_mut_bytes().unwrap_or_default())?;
            }
        }
    }
    Ok(())
}

/// Take the last `count` elements off `frame`, in frame order.
fn pop_trailer<'a>(frame: &mut Frame<'a>, count: usize) -> Result<Vec<FrameElement<'a>>, StseError> {
    let mut tail = Vec::with_capacity(count);
    while tail.len() < count {
        let Some(element) = frame.pop() else {
            tail.reverse();
            push_trailer(frame, tail)?;
            return Err(StseError::InvalidParameter("response trailer is covered by a strap"));
        };
        tail.push(element);
    }
    tail.reverse();
    Ok(tail)
}

fn push_trailer<'a>(frame: &mut Frame<'a>, tail: Vec<FrameElement<'a>>) -> Result<(), StseError> {
    for element in tail {
        frame.push(element)?;
    }
    Ok(())
}

fn check_response_layout(frame: &Frame<'_>) -> Result<(), StseError> {
    let header = frame.first().ok_or(FrameError::Empty)?;
    if header.len() != ResponseHeader::SIZE {
        return Err(StseError::InvalidParameter("response header must be one byte"));
    }
    if let Some(index) = frame.routed().position(|e| !e.is_writable()) {
        return Err(FrameError::ReadOnlyElement { index }.into());
    }
    Ok(())
}

fn response_header(frame: &Frame<'_>) -> ResponseHeader {
    ResponseHeader(frame.first().and_then(|e| e.as_bytes().first().copied()).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, time::Duration};

    use stse_crypto::SoftwareCrypto;
    use stse_proto::{Crc16, DeviceStatus, X25};

    use super::*;
    use crate::device::DeviceType;

    /// Bus replaying canned bytes and recording what was written.
    #[derive(Default)]
    struct ScriptedBus {
        response: Vec<u8>,
        cursor: usize,
        written: Vec<u8>,
        send_failures: VecDeque<BusError>,
        send_starts: usize,
        recv_starts: usize,
        fail_recv_after: Option<usize>,
    }

    impl Bus for ScriptedBus {
        fn send_start(&mut self, _length: u16) -> Result<(), BusError> {
            self.send_starts += 1;
            if let Some(e) = self.send_failures.pop_front() {
                return Err(e);
            }
            self.written.clear();
            Ok(())
        }

        fn send_continue(&mut self, data: &[u8]) -> Result<(), BusError> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn send_stop(&mut self, data: &[u8]) -> Result<(), BusError> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn recv_start(&mut self, _length: u16) -> Result<(), BusError> {
            self.recv_starts += 1;
            self.cursor = 0;
            Ok(())
        }

        fn recv_continue(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
            let end = self.cursor + buf.len();
            buf.copy_from_slice(&self.response[self.cursor..end]);
            self.cursor = end;
            Ok(())
        }

        fn recv_stop(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
            if self.fail_recv_after.is_some_and(|after| self.recv_starts > after) {
                return Err(BusError::Driver("bus lost".into()));
            }
            self.recv_continue(buf)
        }
    }

    #[derive(Default)]
    struct RecordingEnv {
        delays: RefCell<Vec<Duration>>,
    }

    impl Environment for RecordingEnv {
        fn delay(&self, duration: Duration) {
            self.delays.borrow_mut().push(duration);
        }
    }

    fn handle(bus: ScriptedBus) -> DeviceHandle<ScriptedBus, SoftwareCrypto, RecordingEnv> {
        DeviceHandle::new(DeviceType::StsafeA110, bus, SoftwareCrypto, RecordingEnv::default())
    }

    fn response_bytes(status: u8, payload: &[u8]) -> Vec<u8> {
        let mut covered = vec![status];
        covered.extend_from_slice(payload);
        let crc = X25.crc16_calculate(&covered);

        let mut wire = vec![status];
        wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        wire.extend_from_slice(payload);
        wire.extend_from_slice(&crc.to_be_bytes());
        wire
    }

    #[test]
    fn transmit_appends_crc_and_restores_frame() {
        let mut device = handle(ScriptedBus::default());
        let payload = [0xAA, 0xBB];
        let mut cmd = Frame::from_elements([
            FrameElement::byte(0x00),
            FrameElement::borrowed(&payload).unwrap(),
        ])
        .unwrap();

        device.transmit(&mut cmd).unwrap();

        let crc = X25.crc16_calculate(&[0x00, 0xAA, 0xBB]);
        let mut expected = vec![0x00, 0xAA, 0xBB];
        expected.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(device.bus().written, expected);
        assert_eq!(cmd.element_count(), 2);
        assert_eq!(cmd.len(), 3);
    }

    #[test]
    fn transmit_retries_acknowledge_failures() {
        let bus = ScriptedBus {
            send_failures: VecDeque::from([BusError::Ack, BusError::Ack]),
            ..ScriptedBus::default()
        };
        let mut device = handle(bus);
        let mut cmd = Frame::from_elements([FrameElement::byte(0x00)]).unwrap();

        device.transmit(&mut cmd).unwrap();

        assert_eq!(device.bus().send_starts, 3);
        assert_eq!(device.env().delays.borrow().len(), 2);
    }

    #[test]
    fn transmit_gives_up_after_budget() {
        let bus = ScriptedBus {
            send_failures: VecDeque::from(vec![BusError::Timeout; 10]),
            ..ScriptedBus::default()
        };
        let mut device = handle(bus).with_config(TransportConfig {
            retry_budget: 4,
            ..TransportConfig::default()
        });
        let mut cmd = Frame::from_elements([FrameElement::byte(0x00)]).unwrap();

        let err = device.transmit(&mut cmd).unwrap_err();

        assert_eq!(err, StseError::Bus { source: BusError::Timeout, attempts: 4 });
        assert_eq!(cmd.element_count(), 1);
    }

    #[test]
    fn transmit_does_not_retry_driver_faults() {
        let bus = ScriptedBus {
            send_failures: VecDeque::from([BusError::Driver("gone".into())]),
            ..ScriptedBus::default()
        };
        let mut device = handle(bus);
        let mut cmd = Frame::from_elements([FrameElement::byte(0x00)]).unwrap();

        assert!(device.transmit(&mut cmd).is_err());
        assert_eq!(device.bus().send_starts, 1);
    }

    #[test]
    fn receive_fills_and_shrinks_elements() {
        let bus = ScriptedBus { response: response_bytes(0x00, &[1, 2, 3, 4, 5]), ..Default::default() };
        let mut device = handle(bus);
        let mut first = [0u8; 2];
        let mut second = [0u8; 8];
        let mut rsp = Frame::from_elements([
            FrameElement::byte(0xFF),
            FrameElement::mutable(&mut first).unwrap(),
            FrameElement::mutable(&mut second).unwrap(),
        ])
        .unwrap();

        device.receive(&mut rsp).unwrap();

        assert_eq!(rsp.elements()[0].as_bytes(), &[0x00]);
        assert_eq!(rsp.elements()[1].as_bytes(), &[1, 2]);
        assert_eq!(rsp.elements()[2].as_bytes(), &[3, 4, 5]);
        assert_eq!(rsp.element_count(), 3);
        assert_eq!(rsp.len(), 6);
    }

    #[test]
    fn receive_fills_trailer_from_end_of_short_reply() {
        let bus = ScriptedBus {
            response: response_bytes(0x80, &[1, 2, 3, 0xA, 0xB, 0xC, 0xD]),
            ..Default::default()
        };
        let mut device = handle(bus);
        let mut field = [0u8; 16];
        let mut rsp = Frame::from_elements([
            FrameElement::byte(0xFF),
            FrameElement::mutable(&mut field).unwrap(),
            FrameElement::zeroed(4),
        ])
        .unwrap();

        device.receive_with_trailer(&mut rsp, 1).unwrap();

        assert_eq!(rsp.elements()[1].as_bytes(), &[1, 2, 3]);
        assert_eq!(rsp.elements()[2].as_bytes(), &[0xA, 0xB, 0xC, 0xD]);
        assert_eq!(rsp.element_count(), 3);
        assert_eq!(rsp.len(), 8);
    }

    #[test]
    fn receive_routes_surplus_before_trailer() {
        let mut payload = vec![7u8; 6];
        payload.extend_from_slice(&[0xA, 0xB, 0xC, 0xD]);
        let bus = ScriptedBus { response: response_bytes(0x80, &payload), ..Default::default() };
        let mut device = handle(bus);
        let mut field = [0u8; 2];
        let mut rsp = Frame::from_elements([
            FrameElement::byte(0xFF),
            FrameElement::mutable(&mut field).unwrap(),
            FrameElement::zeroed(4),
        ])
        .unwrap();

        device.receive_with_trailer(&mut rsp, 1).unwrap();

        assert_eq!(rsp.elements()[1].as_bytes(), &[7, 7]);
        assert_eq!(rsp.elements()[2].as_bytes(), &[0xA, 0xB, 0xC, 0xD]);
        assert_eq!(rsp.element_count(), 3);
        assert_eq!(rsp.len(), 7);
    }

    #[test]
    fn receive_restores_lengths_when_bus_fails_mid_frame() {
        let bus = ScriptedBus {
            response: response_bytes(0x00, &[1, 2]),
            fail_recv_after: Some(1),
            ..Default::default()
        };
        let mut device = handle(bus);
        let mut field = [0u8; 8];
        let mut rsp = Frame::from_elements([
            FrameElement::byte(0xFF),
            FrameElement::mutable(&mut field).unwrap(),
        ])
        .unwrap();

        let err = device.receive(&mut rsp).unwrap_err();

        assert!(matches!(err, StseError::Bus { attempts: 1, .. }));
        assert_eq!(rsp.element_count(), 2);
        assert_eq!(rsp.elements()[1].len(), 8);
        assert_eq!(rsp.len(), 9);
    }

    #[test]
    fn receive_routes_surplus_into_filler() {
        let bus = ScriptedBus { response: response_bytes(0x00, &[9; 6]), ..Default::default() };
        let mut device = handle(bus);
        let mut field = [0u8; 2];
        let mut rsp = Frame::from_elements([
            FrameElement::byte(0xFF),
            FrameElement::mutable(&mut field).unwrap(),
        ])
        .unwrap();

        device.receive(&mut rsp).unwrap();

        assert_eq!(rsp.elements()[1].as_bytes(), &[9, 9]);
        assert_eq!(rsp.element_count(), 2);
    }

    #[test]
    fn receive_detects_corruption() {
        let mut response = response_bytes(0x00, &[1, 2, 3]);
        response[4] ^= 0x01;
        let mut device = handle(ScriptedBus { response, ..Default::default() });
        let mut field = [0u8; 3];
        let mut rsp = Frame::from_elements([
            FrameElement::byte(0xFF),
            FrameElement::mutable(&mut field).unwrap(),
        ])
        .unwrap();

        let err = device.receive(&mut rsp).unwrap_err();

        assert!(matches!(err, StseError::Crc { .. }));
        assert_eq!(rsp.element_count(), 2);
    }

    #[test]
    fn receive_surfaces_device_status() {
        let bus = ScriptedBus { response: response_bytes(0x0A, &[]), ..Default::default() };
        let mut device = handle(bus);
        let mut rsp = Frame::from_elements([FrameElement::byte(0xFF)]).unwrap();

        let err = device.receive(&mut rsp).unwrap_err();

        assert_eq!(err, StseError::Device(DeviceStatus::EntryNotFound));
    }

    #[test]
    fn receive_rejects_oversized_length() {
        let response = vec![0x00, 0x08, 0x00];
        let mut device = handle(ScriptedBus { response, ..Default::default() });
        let mut rsp = Frame::from_elements([FrameElement::byte(0xFF)]).unwrap();

        let err = device.receive(&mut rsp).unwrap_err();

        assert_eq!(err, StseError::BufferLengthExceeded { declared: 0x0800, max: MAX_RESPONSE_LENGTH });
    }

    #[test]
    fn receive_rejects_read_only_payload() {
        let mut device = handle(ScriptedBus::default());
        let data = [0u8; 4];
        let mut rsp = Frame::from_elements([
            FrameElement::byte(0xFF),
            FrameElement::borrowed(&data).unwrap(),
        ])
        .unwrap();

        let err = device.receive(&mut rsp).unwrap_err();

        assert_eq!(err, StseError::Frame(FrameError::ReadOnlyElement { index: 1 }));
    }

    #[test]
    fn execution_time_policy_uses_device_table() {
        let mut device = handle(ScriptedBus::default());
        let cmd = Frame::from_elements([FrameElement::byte(0x11)]).unwrap();
        assert_eq!(device.inter_frame_delay(&cmd).unwrap(), DEFAULT_FIRST_POLL);

        device = device.with_config(TransportConfig {
            delay_policy: DelayPolicy::ExecutionTime,
            ..TransportConfig::default()
        });
        assert_eq!(device.inter_frame_delay(&cmd).unwrap(), Duration::from_millis(150));
    }
}
