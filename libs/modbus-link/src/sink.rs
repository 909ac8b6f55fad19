//! External collaborators: data publication and status indicator
//!
//! Neither sink may block the polling loop. Publications go through a
//! synchronous callback; indicator colors go through a small bounded queue
//! and are dropped when it is full.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::operation::{OperationOutput, ReadKind};
use crate::state::ConnectionState;

/// One scheduled-read result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Publication {
    /// Topic-like key, e.g. `modbus/input/199`
    pub key: String,
    pub kind: ReadKind,
    pub start_address: u16,
    pub values: OperationOutput,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Publication {
    pub fn new(key: impl Into<String>, kind: ReadKind, start_address: u16, values: OperationOutput) -> Self {
        Self {
            key: key.into(),
            kind,
            start_address,
            values,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Receives scheduled-read results
///
/// Called from the polling task; implementations must return promptly.
pub trait PublishSink: Send + Sync {
    fn publish(&self, publication: &Publication);
}

/// Forwards publications into a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Publication>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<Publication>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Publication>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl PublishSink for ChannelPublisher {
    fn publish(&self, publication: &Publication) {
        if let Err(e) = self.tx.try_send(publication.clone()) {
            match e {
                TrySendError::Full(p) => {
                    tracing::warn!("Publish queue full, dropped {}", p.key)
                },
                TrySendError::Closed(p) => {
                    tracing::warn!("Publish queue closed, dropped {}", p.key)
                },
            }
        }
    }
}

/// RGB color command for the status LED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndicatorColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl IndicatorColor {
    pub const OFF: Self = Self::rgb(0, 0, 0);
    pub const RED: Self = Self::rgb(255, 0, 0);
    pub const GREEN: Self = Self::rgb(0, 255, 0);
    pub const BLUE: Self = Self::rgb(0, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn for_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self::OFF,
            ConnectionState::Connecting => Self::BLUE,
            ConnectionState::Connected => Self::GREEN,
            ConnectionState::Error => Self::RED,
        }
    }
}

/// Non-blocking producer side of the indicator queue
#[derive(Debug, Clone)]
pub struct IndicatorSink {
    tx: mpsc::Sender<IndicatorColor>,
}

impl IndicatorSink {
    pub fn new(tx: mpsc::Sender<IndicatorColor>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<IndicatorColor>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Enqueue a color; returns false when the command was dropped
    pub fn notify(&self, color: IndicatorColor) -> bool {
        match self.tx.try_send(color) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Indicator queue full, dropped {:?}", color);
                false
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Indicator receiver gone, dropped {:?}", color);
                false
            },
        }
    }

    pub fn show_state(&self, state: ConnectionState) -> bool {
        self.notify(IndicatorColor::for_state(state))
    }
}
