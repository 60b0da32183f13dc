//! Core types for the FleetLink HTTP-to-BLE vehicle bridge
//!
//! FleetLink mirrors the Tesla Fleet API command and state-read surface over
//! HTTP and executes requests against a vehicle over Bluetooth Low Energy.
//! This crate holds everything that is independent of the transport and of
//! the HTTP server:
//!
//! - the [`command::Command`] model and its completion plumbing
//! - the declarative [`fleet`] validator/executor table
//! - the [`vehicle`] trait seam to the (external) BLE driver
//! - the per-endpoint [`cache::VehicleDataCache`]
//! - shared [`error`] and [`config`] types
//!
//! The session orchestrator that drives these lives in `fleetlink-ble`; the
//! HTTP surface lives in `fleetlink-node`.

#![warn(missing_docs)]

pub mod args;
pub mod cache;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod vehicle;

pub use args::CommandArgs;
pub use cache::VehicleDataCache;
pub use command::{Command, CommandOutcome, CommandSource, Completion};
pub use config::Config;
pub use dispatch::SendEnv;
pub use error::{BridgeError, Result};
pub use vehicle::{
    Beacon, BodyControllerState, Domain, PrivateKeyPem, SleepStatus, StateCategory, VehicleAction,
    VehicleConnector, VehicleHandle,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
