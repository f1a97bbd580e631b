//! Device handle: the single owner of everything a transfer touches.

use stse_crypto::CryptoPlatform;
use stse_proto::{CommandHeader, DeviceStatus, Frame, FrameError};

use crate::{
    bus::Bus,
    device::DeviceType,
    env::Environment,
    error::StseError,
    perso::{AccessCondition, PersoInfo},
    session::Session,
    transport::TransportConfig,
};

/// Handle to one secure element.
///
/// Owns the bus driver, the crypto platform, the environment, the transport
/// configuration, the personalization table and the active sessions. All
/// operations take `&mut self`; callers sharing a device serialize access.
pub struct DeviceHandle<B, C, E> {
    pub(crate) device_type: DeviceType,
    pub(crate) bus: B,
    pub(crate) crypto: C,
    pub(crate) env: E,
    pub(crate) config: TransportConfig,
    pub(crate) perso: PersoInfo,
    pub(crate) host_session: Option<Session>,
    pub(crate) other_session: Option<Session>,
}

impl<B, C, E> DeviceHandle<B, C, E> {
    /// Create a handle with default transport configuration and
    /// personalization.
    pub fn new(device_type: DeviceType, bus: B, crypto: C, env: E) -> Self {
        Self {
            device_type,
            bus,
            crypto,
            env,
            config: TransportConfig::default(),
            perso: PersoInfo::default(),
            host_session: None,
            other_session: None,
        }
    }

    /// Replace the transport configuration.
    #[must_use]
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the personalization table.
    #[must_use]
    pub fn with_perso(mut self, perso: PersoInfo) -> Self {
        self.perso = perso;
        self
    }

    /// Device family
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Personalization table in use
    pub fn perso(&self) -> &PersoInfo {
        &self.perso
    }

    /// Transport configuration in use
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Bus driver
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable bus driver
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Crypto platform
    pub fn crypto(&self) -> &C {
        &self.crypto
    }

    /// Environment
    pub fn env(&self) -> &E {
        &self.env
    }
}

impl<B: Bus, C: CryptoPlatform, E: Environment> DeviceHandle<B, C, E> {
    /// Wake the device and load its personalization.
    ///
    /// Devices without a command authorization table keep the default
    /// personalization.
    ///
    /// # Errors
    ///
    /// Transport errors from the wake-up or the query.
    pub fn init(&mut self) -> Result<(), StseError> {
        self.wake()?;

        match self.query_command_authorization() {
            Ok(table) => {
                self.perso = PersoInfo::from_records(&table.records);
                tracing::info!(
                    device = ?self.device_type,
                    commands = table.records.len(),
                    "device initialized"
                );
                Ok(())
            },
            Err(StseError::Device(DeviceStatus::UnsupportedCommand)) => {
                tracing::info!(device = ?self.device_type, "no authorization table, using defaults");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Wake the device from sleep.
    ///
    /// # Errors
    ///
    /// `StseError::Bus` if the device never answers.
    pub fn wake(&mut self) -> Result<(), StseError> {
        self.with_retries("wake", |bus| bus.wake())
    }

    /// Power the device up.
    ///
    /// # Errors
    ///
    /// `StseError::Bus` on driver failure.
    pub fn power_on(&mut self) -> Result<(), StseError> {
        self.with_retries("power on", |bus| bus.power_on())
    }

    /// Power the device down.
    ///
    /// Sessions do not survive a power cycle and are dropped.
    ///
    /// # Errors
    ///
    /// `StseError::Bus` on driver failure.
    pub fn power_off(&mut self) -> Result<(), StseError> {
        self.close_host_session();
        self.close_kek_session();
        self.with_retries("power off", |bus| bus.power_off())
    }

    /// Exchange a command with the protection its personalization requires.
    ///
    /// Free, unencrypted commands go out raw. Commands requiring a session
    /// are authenticated. Commands with an encrypted direction are
    /// encrypted and authenticated.
    ///
    /// # Errors
    ///
    /// - `StseError::CommandNotPermitted` if the access condition is `Never`
    /// - `StseError::NoSession` if protection is required without a session
    /// - any transport, session or device error of the chosen path
    pub fn transfer(&mut self, cmd: &mut Frame<'_>, rsp: &mut Frame<'_>) -> Result<(), StseError> {
        let header = cmd
            .first()
            .and_then(|e| CommandHeader::parse(e.as_bytes()))
            .ok_or(FrameError::Empty)?;
        let access = self.perso.access_condition(header.code);
        let encryption = self.perso.encryption_flags(header.code);

        tracing::debug!(code = ?header.code, ?access, ?encryption, "dispatching transfer");

        match access {
            AccessCondition::Never => Err(StseError::CommandNotPermitted(header.code)),
            _ if encryption.any() => self.encrypted_transfer(cmd, rsp, encryption),
            AccessCondition::Admin | AccessCondition::Host => self.authenticated_transfer(cmd, rsp),
            AccessCondition::Free => self.raw_transfer(cmd, rsp),
        }
    }
}
