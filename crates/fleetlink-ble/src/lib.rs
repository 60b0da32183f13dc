//! BLE session orchestration for the FleetLink bridge
//!
//! The heart of the bridge: a single long-lived task
//! ([`control::BleControl`]) owns the one BLE session the radio allows and
//! multiplexes concurrent HTTP callers onto it. The [`keystore`] persists
//! the role-based ECDSA keys the session authenticates with.
//!
//! The concrete BLE transport is an external driver implementing
//! [`fleetlink_core::VehicleConnector`]; the scriptable mock in [`testing`]
//! doubles as the reference implementation of that seam.

#![warn(missing_docs)]

pub mod control;
pub mod keystore;
pub mod testing;

pub use control::{BleControl, BleHandle};
pub use keystore::{KeyRole, KeyStore};
