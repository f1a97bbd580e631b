//! Bus driver interface.
//!
//! The secure element sits on a half-duplex bus (I2C or 1-Wire). A frame is
//! moved in one chunked transaction: `*_start` announces the total length,
//! `*_continue` moves every element but the last, `*_stop` moves the last
//! element and releases the bus.

use thiserror::Error;

/// Errors reported by a bus driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Device did not acknowledge (busy or asleep)
    #[error("device did not acknowledge")]
    Ack,

    /// Another master won arbitration
    #[error("bus arbitration lost")]
    ArbitrationLost,

    /// Transaction did not complete in time
    #[error("bus timeout")]
    Timeout,

    /// Driver or hardware fault
    #[error("bus driver failure: {0}")]
    Driver(String),
}

impl BusError {
    /// Returns true if this error may clear on retry.
    ///
    /// A busy device NACKs until it has finished processing, so
    /// acknowledge failures are the normal polling signal. Driver faults are
    /// never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Ack | Self::ArbitrationLost | Self::Timeout)
    }
}

/// Chunked half-duplex bus driver.
///
/// Implementations address a single device; bus number, address and speed
/// are configuration of the driver itself.
pub trait Bus {
    /// Begin a write transaction of `length` bytes.
    fn send_start(&mut self, length: u16) -> Result<(), BusError>;

    /// Write a chunk inside the current transaction.
    fn send_continue(&mut self, data: &[u8]) -> Result<(), BusError>;

    /// Write the final chunk and end the transaction.
    fn send_stop(&mut self, data: &[u8]) -> Result<(), BusError>;

    /// Begin a read transaction of `length` bytes.
    fn recv_start(&mut self, length: u16) -> Result<(), BusError>;

    /// Read a chunk inside the current transaction.
    fn recv_continue(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Read the final chunk and end the transaction.
    fn recv_stop(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Wake the device from sleep or standby.
    fn wake(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Power the device up.
    fn power_on(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Power the device down.
    fn power_off(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_errors_are_transient() {
        assert!(BusError::Ack.is_transient());
        assert!(BusError::ArbitrationLost.is_transient());
        assert!(BusError::Timeout.is_transient());
    }

    #[test]
    fn driver_faults_are_fatal() {
        assert!(!BusError::Driver("i2c controller reset".to_string()).is_transient());
    }
}
