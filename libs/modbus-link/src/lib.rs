//! Modbus Link Library
//!
//! Modbus TCP master client for the field gateway.
//!
//! # Architecture
//!
//! ```text
//! ModbusClient (facade: start/stop/read/write/get_state)
//!     │  bounded request queue (many producers, one consumer)
//!     ▼
//! PollingLoop (single owner task)
//!     ├── Dispatcher (validation, error mapping, response shaping)
//!     └── ConnectionStateMachine (owns the transport session)
//!             └── Connector / Session (tokio-modbus TCP, or a mock)
//! ```
//!
//! Results of scheduled reads are pushed to a [`PublishSink`]; connection
//! state changes are mirrored to an [`IndicatorSink`] as color commands.
//! Both sinks are external collaborators and never block the polling loop.

pub mod client;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod machine;
pub mod operation;
pub mod polling;
pub mod sink;
pub mod state;
pub mod tcp;
pub mod transport;

// Test utilities (mock transport binding, usable from integration tests)
pub mod test_utils;

// Re-export core types
pub use client::ModbusClient;
pub use config::{ClientConfig, PollingConfig, ScheduledRead};
pub use error::{ClientError, Result};
pub use operation::{OperationOutput, ReadKind, RegisterOperation};
pub use sink::{ChannelPublisher, IndicatorColor, IndicatorSink, PublishSink, Publication};
pub use state::{ConnectionState, LinkEvent};
pub use tcp::TcpConnector;
pub use transport::{Connector, Endpoint, Session, TransportError};
