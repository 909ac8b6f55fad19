//! Client and polling configuration
//!
//! Both structs deserialize with serde so the owning service can layer them
//! from YAML and environment variables. Zero-valued optional fields are
//! replaced by defaults when the client is created.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_MODBUS_PORT, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RETRY_INTERVAL_MS,
    DEFAULT_SCHEDULED_ADDRESS, DEFAULT_SCHEDULED_KEY, DEFAULT_SCHEDULED_QUANTITY,
    DEFAULT_TIMEOUT_MS,
};
use crate::error::{ClientError, Result};
use crate::operation::{ReadKind, RegisterOperation};
use crate::transport::Endpoint;

fn default_port() -> u16 {
    DEFAULT_MODBUS_PORT
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_max_retries() -> u8 {
    DEFAULT_MAX_RETRIES
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_scheduled_read() -> Option<ScheduledRead> {
    Some(ScheduledRead::default())
}

/// Connection parameters of one Modbus TCP device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Device hostname or IP address
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Wait in Error before the next reconnect attempt
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Consecutive reconnect cycles before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
            auto_reconnect: true,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            ..Self::default()
        }
    }

    /// Reject an empty host and replace zero-valued fields with defaults
    pub fn normalized(mut self) -> Result<Self> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ClientError::invalid_argument("host must not be empty"));
        }
        if host.len() != self.host.len() {
            self.host = host.to_string();
        }

        if self.port == 0 {
            self.port = DEFAULT_MODBUS_PORT;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = DEFAULT_TIMEOUT_MS;
        }
        if self.retry_interval_ms == 0 {
            self.retry_interval_ms = DEFAULT_RETRY_INTERVAL_MS;
        }
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }

        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
            timeout: self.timeout(),
        }
    }
}

/// Periodic read performed while connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRead {
    /// Publication key handed to the publish sink
    #[serde(default = "default_scheduled_key")]
    pub key: String,

    #[serde(default = "default_scheduled_kind")]
    pub kind: ReadKind,

    #[serde(default = "default_scheduled_address")]
    pub start_address: u16,

    #[serde(default = "default_scheduled_quantity")]
    pub quantity: u16,
}

fn default_scheduled_key() -> String {
    DEFAULT_SCHEDULED_KEY.to_string()
}

fn default_scheduled_kind() -> ReadKind {
    ReadKind::Input
}

fn default_scheduled_address() -> u16 {
    DEFAULT_SCHEDULED_ADDRESS
}

fn default_scheduled_quantity() -> u16 {
    DEFAULT_SCHEDULED_QUANTITY
}

impl Default for ScheduledRead {
    fn default() -> Self {
        Self {
            key: default_scheduled_key(),
            kind: default_scheduled_kind(),
            start_address: default_scheduled_address(),
            quantity: default_scheduled_quantity(),
        }
    }
}

impl ScheduledRead {
    pub fn operation(&self) -> RegisterOperation {
        RegisterOperation::read(self.kind, self.start_address, self.quantity)
    }
}

/// Polling loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// `None` disables the scheduled read; the loop then only serves requests
    #[serde(default = "default_scheduled_read")]
    pub scheduled_read: Option<ScheduledRead>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            scheduled_read: default_scheduled_read(),
        }
    }
}

impl PollingConfig {
    /// Polling without a scheduled read
    pub fn requests_only() -> Self {
        Self {
            scheduled_read: None,
            ..Self::default()
        }
    }

    /// Validate the scheduled read and default a zero interval
    pub fn normalized(mut self) -> Result<Self> {
        if self.interval_ms == 0 {
            self.interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if let Some(read) = &self.scheduled_read {
            read.operation().validate()?;
            if read.key.trim().is_empty() {
                return Err(ClientError::invalid_argument(
                    "scheduled read key must not be empty",
                ));
            }
        }
        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
