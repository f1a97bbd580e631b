//! Deterministic simulation harness for the STSE host stack.
//!
//! [`SimDevice`] stands in for a secure element on the bus and [`SimEnv`]
//! replaces wall-clock delays with virtual time. Together they let the full
//! stack (transport, sessions, MAC and encryption) run in-process, with
//! scripted or seeded faults, and make every run reproducible.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod sim_device;
pub mod sim_env;

pub use sim_device::{FaultPlan, SimDevice, SimStats};
pub use sim_env::SimEnv;
