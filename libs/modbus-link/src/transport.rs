//! Transport seam
//!
//! The client never talks to a socket directly. A [`Connector`] opens a
//! [`Session`] for an [`Endpoint`]; the session carries one register
//! operation at a time. The TCP binding lives in [`crate::tcp`], a scripted
//! in-memory binding in [`crate::test_utils`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::operation::{OperationOutput, RegisterOperation};

/// Remote device address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
}

impl Endpoint {
    /// `host:port` form used for resolution and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} unit={}", self.host, self.port, self.unit_id)
    }
}

/// Failures reported by a transport binding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport timed out")]
    Timeout,

    /// Exception response from the device
    #[error("device exception 0x{0:02X}")]
    Exception(u8),

    /// Session-level I/O failure; the session is no longer usable
    #[error("I/O error: {0}")]
    Io(String),

    /// Session could not be established
    #[error("unreachable: {0}")]
    Unreachable(String),
}

/// Opens sessions to a device
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, TransportError>;
}

/// An open session, owned by exactly one task
///
/// `&mut self` on `submit` keeps calls on a session strictly sequential.
#[async_trait]
pub trait Session: Send {
    /// Carry one operation and wait for its response
    async fn submit(&mut self, op: &RegisterOperation) -> Result<OperationOutput, TransportError>;

    /// Whether the underlying link is still believed usable
    fn is_alive(&self) -> bool;

    /// Release the link; called exactly once per opened session
    async fn close(&mut self);
}
