//! Payload encryption for protected commands.
//!
//! Payloads are padded with `0x80` then zeros up to the next block boundary
//! (a full block of padding when already aligned) and encrypted with
//! AES-CBC under the session cipher key. The IV is the ECB encryption of a
//! derivation block: subject `0x80` with the counter the device will hold
//! after the exchange for commands, subject `0xC0` with the advanced
//! counter for responses.
//!
//! Ciphertext replaces the payload fields through a frame strap, so callers
//! keep building and reading frames field by field.

use stse_crypto::{AES_BLOCK_SIZE, CryptoPlatform};
use stse_proto::{Frame, FrameElement, FrameError, ResponseHeader};

use crate::{
    bus::Bus,
    env::Environment,
    error::StseError,
    handle::DeviceHandle,
    mac::counter_block,
    perso::EncryptionFlags,
    session::HostSession,
};

/// Derivation subject of command IVs
pub const COMMAND_IV_SUBJECT: u8 = 0x80;

/// Derivation subject of response IVs
pub const RESPONSE_IV_SUBJECT: u8 = 0xC0;

const PADDING_START: u8 = 0x80;

/// Length of `len` bytes once padded.
#[must_use]
pub const fn padded_len(len: usize) -> usize {
    (len / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE
}

/// Append `0x80` and zeros up to the next block boundary.
pub fn pad(data: &mut Vec<u8>) {
    let target = padded_len(data.len());
    data.push(PADDING_START);
    data.resize(target, 0);
}

/// Plaintext without its padding, or `None` if the padding is malformed.
#[must_use]
pub fn unpad(data: &[u8]) -> Option<&[u8]> {
    let end = data.iter().rposition(|&b| b != 0)?;
    (data[end] == PADDING_START && data.len() - end <= AES_BLOCK_SIZE).then(|| &data[..end])
}

fn derive_iv<C: CryptoPlatform>(
    crypto: &C,
    session: &HostSession,
    counter: u32,
    subject: u8,
) -> Result<[u8; AES_BLOCK_SIZE], StseError> {
    let mut iv = counter_block(session.counter_width(), counter, subject);
    crypto.aes_ecb_encrypt(session.cipher_key(), &mut iv)?;
    Ok(iv)
}

/// Padded ciphertext of the command payload (every element after the
/// header).
pub(crate) fn encrypt_command_body<C: CryptoPlatform>(
    crypto: &C,
    session: &HostSession,
    cmd: &Frame<'_>,
) -> Result<Vec<u8>, StseError> {
    let mut body = cmd.payload_bytes();
    pad(&mut body);

    let iv = derive_iv(crypto, session, session.mac_counter().wrapping_add(1), COMMAND_IV_SUBJECT)?;
    crypto.aes_cbc_encrypt(session.cipher_key(), &iv, &mut body)?;
    Ok(body)
}

/// Decrypt a response body in place under the session's current counter.
pub(crate) fn decrypt_response_body<C: CryptoPlatform>(
    crypto: &C,
    session: &HostSession,
    body: &mut [u8],
) -> Result<(), StseError> {
    if body.len() % AES_BLOCK_SIZE != 0 {
        return Err(StseError::Decryption("ciphertext is not block aligned"));
    }
    let iv = derive_iv(crypto, session, session.mac_counter(), RESPONSE_IV_SUBJECT)?;
    crypto.aes_cbc_decrypt(session.cipher_key(), &iv, body)?;
    Ok(())
}

impl<B: Bus, C: CryptoPlatform, E: Environment> DeviceHandle<B, C, E> {
    /// Authenticated exchange with encrypted payloads.
    ///
    /// `flags` selects which directions are encrypted. The command payload
    /// is replaced by its ciphertext for the exchange; the response payload
    /// is received as ciphertext, decrypted and scattered back into the
    /// response fields. Both frames leave with their original layout.
    ///
    /// # Errors
    ///
    /// - `StseError::NoSession` if no host session is open
    /// - `StseError::Decryption` if the response padding is malformed
    /// - any error of [`Self::authenticated_transfer`]
    pub fn encrypted_transfer(
        &mut self,
        cmd: &mut Frame<'_>,
        rsp: &mut Frame<'_>,
        flags: EncryptionFlags,
    ) -> Result<(), StseError> {
        let Some(session) = self.host_session() else {
            return Err(StseError::NoSession);
        };

        if flags.command {
            let body = encrypt_command_body(&self.crypto, session, cmd)?;
            cmd.insert_strap(0, FrameElement::owned(body)?)?;
        }

        if flags.response {
            let capacity = rsp.len().saturating_sub(ResponseHeader::SIZE);
            let placeholder = u16::try_from(padded_len(capacity))
                .map_err(|_| FrameError::LengthOverflow { length: padded_len(capacity) });
            if let Err(e) = placeholder.and_then(|len| rsp.insert_strap(0, FrameElement::zeroed(len))) {
                cmd.unstrap();
                return Err(e.into());
            }
        }

        let result = self.authenticated_transfer(cmd, rsp);

        if flags.command {
            cmd.unstrap();
        }
        let body = if flags.response { rsp.unstrap() } else { None };
        result?;

        let Some(mut body) = body else {
            return Ok(());
        };
        let Some(session) = self.host_session() else {
            return Err(StseError::NoSession);
        };
        let ciphertext = body.as_mut_bytes().ok_or(FrameError::ReadOnlyElement { index: 1 })?;
        decrypt_response_body(&self.crypto, session, ciphertext)?;

        let Some(plaintext) = unpad(ciphertext) else {
            tracing::warn!(counter = session.mac_counter(), "malformed response padding");
            return Err(StseError::Decryption("malformed padding"));
        };
        rsp.scatter(1, plaintext)?;
        Ok(())
    }
}
