//! Host and volatile KEK sessions.
//!
//! A host session binds the application's MAC and cipher keys to the
//! device's host key slot. Its MAC counter mirrors the counter the device
//! keeps for that slot: both sides advance it once per authenticated
//! exchange the device accepted, and every C-MAC, R-MAC and IV is derived
//! from it.
//!
//! # Invariants
//!
//! - The local counter equals the device counter between exchanges
//! - The counter advances only when the device returned an OK status
//! - Key material is zeroed when a session is closed or dropped

use stse_crypto::{AesKey, CryptoPlatform, KeyType, derive_working_kek};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    bus::Bus,
    device::CounterWidth,
    env::Environment,
    error::StseError,
    handle::DeviceHandle,
};

/// Session bound to the device host key slot.
pub struct HostSession {
    mac_key: AesKey,
    cipher_key: AesKey,
    counter_width: CounterWidth,
    mac_counter: u32,
}

impl HostSession {
    /// Bind keys to a counter read from the device.
    ///
    /// # Errors
    ///
    /// `StseError::KeyTypeMismatch` if the two keys are not of the same type.
    pub fn new(
        mac_key: AesKey,
        cipher_key: AesKey,
        counter_width: CounterWidth,
        mac_counter: u32,
    ) -> Result<Self, StseError> {
        if mac_key.key_type() != cipher_key.key_type() {
            return Err(StseError::KeyTypeMismatch { expected: mac_key.key_type() });
        }
        Ok(Self { mac_key, cipher_key, counter_width, mac_counter })
    }

    /// Key type shared by both session keys
    pub fn key_type(&self) -> KeyType {
        self.mac_key.key_type()
    }

    /// Counter width of the bound device
    pub fn counter_width(&self) -> CounterWidth {
        self.counter_width
    }

    /// Current MAC counter
    pub fn mac_counter(&self) -> u32 {
        self.mac_counter
    }

    pub(crate) fn mac_key(&self) -> &AesKey {
        &self.mac_key
    }

    pub(crate) fn cipher_key(&self) -> &AesKey {
        &self.cipher_key
    }

    /// Record one exchange accepted by the device.
    ///
    /// Wraps instead of saturating; the device refuses further commands
    /// once its own counter is exhausted.
    pub(crate) fn advance_counter(&mut self) {
        self.mac_counter = self.mac_counter.wrapping_add(1);
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.mac_counter.zeroize();
    }
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("key_type", &self.key_type())
            .field("counter_width", &self.counter_width)
            .field("mac_counter", &self.mac_counter)
            .finish_non_exhaustive()
    }
}

/// Volatile key-encryption-key session.
///
/// Every wrapped key transfer uses a fresh working KEK derived from the base
/// key and a counter that advances per derivation.
pub struct KekSession {
    base_key: Zeroizing<Vec<u8>>,
    key_type: KeyType,
    working_kek_counter: u32,
}

impl KekSession {
    /// Start a KEK session over `base_key`.
    ///
    /// # Errors
    ///
    /// `StseError::InvalidParameter` if `base_key` is empty.
    pub fn new(base_key: &[u8], key_type: KeyType) -> Result<Self, StseError> {
        if base_key.is_empty() {
            return Err(StseError::InvalidParameter("KEK base key is empty"));
        }
        Ok(Self { base_key: Zeroizing::new(base_key.to_vec()), key_type, working_kek_counter: 0 })
    }

    /// Key type of derived working KEKs
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Number of working KEKs derived so far
    pub fn working_kek_counter(&self) -> u32 {
        self.working_kek_counter
    }

    /// Derive the next working KEK and advance the counter.
    pub fn next_working_kek(&mut self) -> AesKey {
        let key = derive_working_kek(&self.base_key, self.working_kek_counter, self.key_type);
        self.working_kek_counter = self.working_kek_counter.wrapping_add(1);
        key
    }
}

impl std::fmt::Debug for KekSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KekSession")
            .field("key_type", &self.key_type)
            .field("working_kek_counter", &self.working_kek_counter)
            .finish_non_exhaustive()
    }
}

/// Session owned by a device handle.
#[derive(Debug)]
pub enum Session {
    /// Host session (C-MAC / R-MAC, encryption)
    Host(HostSession),
    /// Volatile KEK session
    Kek(KekSession),
}

impl Session {
    /// Host session, if this is one
    pub fn as_host(&self) -> Option<&HostSession> {
        match self {
            Self::Host(session) => Some(session),
            Self::Kek(_) => None,
        }
    }

    /// Mutable host session, if this is one
    pub fn as_host_mut(&mut self) -> Option<&mut HostSession> {
        match self {
            Self::Host(session) => Some(session),
            Self::Kek(_) => None,
        }
    }

    /// Mutable KEK session, if this is one
    pub fn as_kek_mut(&mut self) -> Option<&mut KekSession> {
        match self {
            Self::Kek(session) => Some(session),
            Self::Host(_) => None,
        }
    }
}

impl<B, C, E> DeviceHandle<B, C, E> {
    /// Active host session
    pub fn host_session(&self) -> Option<&HostSession> {
        self.host_session.as_ref().and_then(Session::as_host)
    }

    pub(crate) fn host_session_mut(&mut self) -> Option<&mut HostSession> {
        self.host_session.as_mut().and_then(Session::as_host_mut)
    }

    /// Drop the host session, zeroing its keys.
    pub fn close_host_session(&mut self) {
        if let Some(session) = self.host_session.take() {
            tracing::info!(?session, "host session closed");
        }
    }

    /// Start a volatile KEK session, replacing any previous one.
    ///
    /// # Errors
    ///
    /// `StseError::InvalidParameter` if `base_key` is empty.
    pub fn open_kek_session(&mut self, base_key: &[u8], key_type: KeyType) -> Result<(), StseError> {
        let session = KekSession::new(base_key, key_type)?;
        tracing::info!(?key_type, "KEK session opened");
        self.other_session = Some(Session::Kek(session));
        Ok(())
    }

    /// Active KEK session
    pub fn kek_session_mut(&mut self) -> Option<&mut KekSession> {
        self.other_session.as_mut().and_then(Session::as_kek_mut)
    }

    /// Drop the KEK session, zeroing its base key.
    pub fn close_kek_session(&mut self) {
        if self.other_session.take().is_some() {
            tracing::info!("KEK session closed");
        }
    }
}

impl<B: Bus, C: CryptoPlatform, E: Environment> DeviceHandle<B, C, E> {
    /// Open a host session bound to the device host key slot.
    ///
    /// Reads the slot to learn whether a key is provisioned, its type and
    /// the device's current MAC counter. Replaces any open host session.
    ///
    /// # Errors
    ///
    /// - `StseError::Unsupported` if the device has no host key slot
    /// - `StseError::HostKeyNotProvisioned` if the slot is empty
    /// - `StseError::KeyTypeMismatch` if the keys differ from the slot type
    /// - transport or device errors from the slot query
    pub fn open_host_session(&mut self, mac_key: AesKey, cipher_key: AesKey) -> Result<(), StseError> {
        let slot = self.query_host_key_slot()?;
        if !slot.provisioned {
            return Err(StseError::HostKeyNotProvisioned);
        }
        if mac_key.key_type() != slot.key_type || cipher_key.key_type() != slot.key_type {
            return Err(StseError::KeyTypeMismatch { expected: slot.key_type });
        }

        let session = HostSession::new(mac_key, cipher_key, slot.counter_width, slot.counter)?;
        tracing::info!(key_type = ?slot.key_type, counter = slot.counter, "host session opened");
        self.host_session = Some(Session::Host(session));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps() {
        let mut session = HostSession::new(
            AesKey::aes128([1; 16]),
            AesKey::aes128([2; 16]),
            CounterWidth::Bytes4,
            u32::MAX,
        )
        .unwrap();

        session.advance_counter();
        assert_eq!(session.mac_counter(), 0);
    }

    #[test]
    fn mixed_key_types_rejected() {
        let result = HostSession::new(
            AesKey::aes128([1; 16]),
            AesKey::aes256([2; 32]),
            CounterWidth::Bytes3,
            0,
        );
        assert!(matches!(result, Err(StseError::KeyTypeMismatch { .. })));
    }

    #[test]
    fn debug_hides_keys() {
        let session =
            HostSession::new(AesKey::aes128([0xAB; 16]), AesKey::aes128([0xCD; 16]), CounterWidth::Bytes3, 7)
                .unwrap();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("mac_counter: 7"));
        assert!(!rendered.contains("171"));
    }

    #[test]
    fn kek_session_advances_per_derivation() {
        let mut session = KekSession::new(b"base key material", KeyType::Aes128).unwrap();

        let first = session.next_working_kek();
        let second = session.next_working_kek();

        assert_eq!(session.working_kek_counter(), 2);
        assert_ne!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes().len(), 16);
    }

    #[test]
    fn empty_kek_base_key_rejected() {
        assert!(KekSession::new(&[], KeyType::Aes256).is_err());
    }
}
