//! Command and response authentication (C-MAC / R-MAC).
//!
//! Both MACs are AES-CMAC over a derivation block followed by a transient
//! frame that re-describes the exchange without the CRC and MAC trailers.
//!
//! ```text
//! derivation block:  [counter: 3|4 BE] [subject] [0x80] [0x00 ...]   (16 bytes)
//! C-MAC frame:       [0x00] [cmd header] [cmd len BE] [cmd payload]
//! R-MAC frame:       [0x80] [cmd header] [cmd len BE] [cmd payload]
//!                           [rsp header] [rsp len BE] [rsp payload]
//! ```
//!
//! The C-MAC uses the counter before the exchange, the R-MAC the counter
//! after the device advanced it. Tags are the left-most four bytes.

use stse_crypto::{AES_BLOCK_SIZE, CmacContext, CryptoPlatform};
use stse_proto::{Frame, FrameElement, FrameError, HeaderFlags};

use crate::{
    bus::Bus,
    device::CounterWidth,
    env::Environment,
    error::StseError,
    handle::DeviceHandle,
    session::HostSession,
};

/// Length of C-MAC and R-MAC tags
pub const MAC_SIZE: usize = 4;

/// Derivation subject of the C-MAC
pub const CMAC_SUBJECT: u8 = 0x00;

/// Derivation subject of the R-MAC
pub const RMAC_SUBJECT: u8 = 0x40;

const CMAC_FRAME_TYPE: u8 = 0x00;
const RMAC_FRAME_TYPE: u8 = 0x80;
const BLOCK_PADDING: u8 = 0x80;

/// Derivation block for `counter` and `subject`.
#[must_use]
pub fn counter_block(width: CounterWidth, counter: u32, subject: u8) -> [u8; AES_BLOCK_SIZE] {
    let mut block = [0u8; AES_BLOCK_SIZE];
    let n = width.len();
    block[..n].copy_from_slice(&width.encode(counter));
    block[n] = subject;
    block[n + 1] = BLOCK_PADDING;
    block
}

/// Groups a byte stream into whole blocks before handing it to the CMAC.
struct BlockFeeder<'m, M> {
    mac: &'m mut M,
    block: [u8; AES_BLOCK_SIZE],
    filled: usize,
}

impl<'m, M: CmacContext> BlockFeeder<'m, M> {
    fn new(mac: &'m mut M) -> Self {
        Self { mac, block: [0u8; AES_BLOCK_SIZE], filled: 0 }
    }

    fn feed(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (AES_BLOCK_SIZE - self.filled).min(data.len());
            self.block[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == AES_BLOCK_SIZE {
                self.mac.append(&self.block);
                self.filled = 0;
            }
        }
    }

    fn finish(self) {
        if self.filled > 0 {
            self.mac.append(&self.block[..self.filled]);
        }
    }
}

fn mac_over<M: CmacContext>(mac: &mut M, block: &[u8; AES_BLOCK_SIZE], content: &Frame<'_>) {
    let mut feeder = BlockFeeder::new(mac);
    feeder.feed(block);
    for element in content.routed() {
        feeder.feed(element.as_bytes());
    }
    feeder.finish();
}

/// Header and payload views of one side of the exchange.
fn push_section<'v>(content: &mut Frame<'v>, frame: &'v Frame<'_>) -> Result<(), StseError> {
    let header = frame.first().ok_or(FrameError::Empty)?;
    let payload_len = u16::try_from(frame.len() - header.len())
        .map_err(|_| FrameError::LengthOverflow { length: frame.len() })?;

    content.push(FrameElement::borrowed(header.as_bytes())?)?;
    content.push(FrameElement::word(payload_len))?;
    for element in frame.routed().skip(1) {
        content.push(FrameElement::borrowed(element.as_bytes())?)?;
    }
    Ok(())
}

/// C-MAC of `cmd` under the session's current counter.
pub(crate) fn command_mac<C: CryptoPlatform>(
    crypto: &C,
    session: &HostSession,
    cmd: &Frame<'_>,
) -> Result<[u8; MAC_SIZE], StseError> {
    let mut content = Frame::new();
    content.push(FrameElement::byte(CMAC_FRAME_TYPE))?;
    push_section(&mut content, cmd)?;

    let block = counter_block(session.counter_width(), session.mac_counter(), CMAC_SUBJECT);
    let mut mac = crypto.aes_cmac_init(session.mac_key())?;
    mac_over(&mut mac, &block, &content);

    let mut tag = [0u8; MAC_SIZE];
    mac.compute_finish(&mut tag)?;
    Ok(tag)
}

/// Verify `tag` as the R-MAC of the exchange under the session's current
/// counter.
pub(crate) fn verify_response_mac<C: CryptoPlatform>(
    crypto: &C,
    session: &HostSession,
    cmd: &Frame<'_>,
    rsp: &Frame<'_>,
    tag: &[u8],
) -> Result<bool, StseError> {
    let mut content = Frame::new();
    content.push(FrameElement::byte(RMAC_FRAME_TYPE))?;
    push_section(&mut content, cmd)?;
    push_section(&mut content, rsp)?;

    let block = counter_block(session.counter_width(), session.mac_counter(), RMAC_SUBJECT);
    let mut mac = crypto.aes_cmac_init(session.mac_key())?;
    mac_over(&mut mac, &block, &content);
    Ok(mac.verify_finish(tag))
}

impl<B: Bus, C: CryptoPlatform, E: Environment> DeviceHandle<B, C, E> {
    /// Exchange a command protected by C-MAC, with R-MAC verification.
    ///
    /// Sets the C-MAC, R-MAC and host-session bits in the command header,
    /// appends the C-MAC, and reserves room for the R-MAC at the end of the
    /// response. The R-MAC is taken from the end of the reply, so `rsp` may
    /// describe more room than the device returns. Both frames are returned to their original layout. The
    /// session counter advances once the device accepted the command, even
    /// if the R-MAC then fails to verify.
    ///
    /// # Errors
    ///
    /// - `StseError::NoSession` if no host session is open
    /// - `StseError::RmacMismatch` if the response MAC does not verify
    /// - any error of [`Self::raw_transfer`]
    pub fn authenticated_transfer(&mut self, cmd: &mut Frame<'_>, rsp: &mut Frame<'_>) -> Result<(), StseError> {
        if self.host_session().is_none() {
            return Err(StseError::NoSession);
        }

        let flags = HeaderFlags::authenticated() | HeaderFlags::HOST_SESSION;
        let header = cmd
            .first_mut()
            .ok_or(FrameError::Empty)?
            .as_mut_bytes()
            .and_then(|bytes| bytes.first_mut())
            .ok_or(FrameError::ReadOnlyElement { index: 0 })?;
        *header |= flags.bits();
        let rmac_requested = HeaderFlags::from_byte(*header).contains(HeaderFlags::RMAC);

        let tag = match self.host_session() {
            Some(session) => command_mac(&self.crypto, session, cmd)?,
            None => return Err(StseError::NoSession),
        };

        cmd.push(FrameElement::owned(tag.to_vec())?)?;
        if rmac_requested && let Err(e) = rsp.push(FrameElement::zeroed(MAC_SIZE as u16)) {
            cmd.pop();
            return Err(e.into());
        }

        let result = self.exchange(cmd, rsp, usize::from(rmac_requested));
        cmd.pop();
        let rmac = if rmac_requested { rsp.pop() } else { None };
        result?;

        let Some(session) = self.host_session_mut() else {
            return Err(StseError::NoSession);
        };
        session.advance_counter();
        tracing::debug!(counter = session.mac_counter(), "MAC counter advanced");

        let Some(rmac) = rmac else {
            return Ok(());
        };
        let Some(session) = self.host_session() else {
            return Err(StseError::NoSession);
        };
        if verify_response_mac(&self.crypto, session, cmd, rsp, rmac.as_bytes())? {
            Ok(())
        } else {
            tracing::warn!(counter = session.mac_counter(), "R-MAC verification failed");
            Err(StseError::RmacMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use stse_crypto::{AesKey, SoftwareCrypto};

    use super::*;

    fn session(counter: u32) -> HostSession {
        HostSession::new(
            AesKey::aes128([0x11; 16]),
            AesKey::aes128([0x22; 16]),
            CounterWidth::Bytes3,
            counter,
        )
        .unwrap()
    }

    #[test]
    fn counter_block_layout() {
        let block = counter_block(CounterWidth::Bytes3, 5, CMAC_SUBJECT);
        assert_eq!(block, [0, 0, 5, 0x00, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let block = counter_block(CounterWidth::Bytes4, 0x0102_0304, RMAC_SUBJECT);
        assert_eq!(block[..6], [1, 2, 3, 4, 0x40, 0x80]);
        assert!(block[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn command_mac_is_deterministic_and_counter_bound() {
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let cmd = Frame::from_elements([
            FrameElement::byte(0xE0),
            FrameElement::borrowed(&payload).unwrap(),
        ])
        .unwrap();

        let first = command_mac(&SoftwareCrypto, &session(5), &cmd).unwrap();
        let again = command_mac(&SoftwareCrypto, &session(5), &cmd).unwrap();
        let next = command_mac(&SoftwareCrypto, &session(6), &cmd).unwrap();

        assert_eq!(first, again);
        assert_ne!(first, next);
    }

    #[test]
    fn command_mac_ignores_field_boundaries() {
        let whole = [1u8, 2, 3, 4, 5, 6];
        let split = Frame::from_elements([
            FrameElement::byte(0xE0),
            FrameElement::borrowed(&whole[..2]).unwrap(),
            FrameElement::borrowed(&whole[2..]).unwrap(),
        ])
        .unwrap();
        let joined = Frame::from_elements([
            FrameElement::byte(0xE0),
            FrameElement::borrowed(&whole).unwrap(),
        ])
        .unwrap();

        assert_eq!(
            command_mac(&SoftwareCrypto, &session(9), &split).unwrap(),
            command_mac(&SoftwareCrypto, &session(9), &joined).unwrap()
        );
    }

    #[test]
    fn command_mac_matches_flat_cmac() {
        let payload = [0x42u8; 20];
        let cmd = Frame::from_elements([
            FrameElement::byte(0xE2),
            FrameElement::borrowed(&payload).unwrap(),
        ])
        .unwrap();
        let session = session(5);

        let mut flat = counter_block(CounterWidth::Bytes3, 5, CMAC_SUBJECT).to_vec();
        flat.extend_from_slice(&[CMAC_FRAME_TYPE, 0xE2, 0x00, 20]);
        flat.extend_from_slice(&payload);
        let mut mac = SoftwareCrypto.aes_cmac_init(session.mac_key()).unwrap();
        mac.append(&flat);
        let mut expected = [0u8; MAC_SIZE];
        mac.compute_finish(&mut expected).unwrap();

        assert_eq!(command_mac(&SoftwareCrypto, &session, &cmd).unwrap(), expected);
    }

    #[test]
    fn response_mac_covers_both_frames() {
        let cmd = Frame::from_elements([FrameElement::byte(0xE0)]).unwrap();
        let data = [7u8; 3];
        let rsp = Frame::from_elements([
            FrameElement::byte(0x00),
            FrameElement::borrowed(&data).unwrap(),
        ])
        .unwrap();
        let session = session(6);

        let mut flat = counter_block(CounterWidth::Bytes3, 6, RMAC_SUBJECT).to_vec();
        flat.extend_from_slice(&[RMAC_FRAME_TYPE, 0xE0, 0, 0, 0x00, 0, 3, 7, 7, 7]);
        let mut mac = SoftwareCrypto.aes_cmac_init(session.mac_key()).unwrap();
        mac.append(&flat);
        let mut tag = [0u8; MAC_SIZE];
        mac.compute_finish(&mut tag).unwrap();

        assert!(verify_response_mac(&SoftwareCrypto, &session, &cmd, &rsp, &tag).unwrap());
        tag[0] ^= 1;
        assert!(!verify_response_mac(&SoftwareCrypto, &session, &cmd, &rsp, &tag).unwrap());
    }
}
