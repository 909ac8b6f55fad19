//! gatewaysrv - field gateway service
//!
//! Owns one Modbus TCP link, forwards scheduled-read results to the uplink
//! and mirrors the link state on the status indicator.

pub mod bridge;
pub mod config;
pub mod logging;
pub mod shutdown;

pub const SERVICE_NAME: &str = "gatewaysrv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
