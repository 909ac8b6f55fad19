//! Client Error Types
//!
//! Error taxonomy surfaced by the Modbus client facade.

use thiserror::Error;

use crate::transport::TransportError;

/// Result type for modbus-link operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Modbus client errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Bad configuration or operation bounds (local, never retried)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No active session
    #[error("Not connected")]
    NotConnected,

    /// Request exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Device-reported Modbus exception
    #[error("Modbus exception code 0x{0:02X}")]
    ProtocolError(u8),

    /// Transport failure, the session has been dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Buffer allocation failed
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Session could not be opened
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ClientError::Timeout("transport timed out".to_string()),
            TransportError::Exception(code) => ClientError::ProtocolError(code),
            TransportError::Io(msg) => ClientError::ConnectionLost(msg),
            TransportError::Unreachable(msg) => ClientError::Transport(msg),
        }
    }
}

// Helper methods for creating errors
impl ClientError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ClientError::InvalidArgument(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ClientError::Timeout(msg.into())
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        ClientError::ConnectionLost(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        ClientError::ResourceExhausted(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ClientError::Transport(msg.into())
    }

    /// Check if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected
                | ClientError::Timeout(_)
                | ClientError::ConnectionLost(_)
                | ClientError::Transport(_)
        )
    }

    /// Check if this error leaves the session unusable
    ///
    /// A timed-out exchange counts: the reply may still arrive later and
    /// would be read as the answer to the next request.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, ClientError::ConnectionLost(_) | ClientError::Timeout(_))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert!(matches!(
            ClientError::from(TransportError::Timeout),
            ClientError::Timeout(_)
        ));
        assert_eq!(
            ClientError::from(TransportError::Exception(0x02)),
            ClientError::ProtocolError(0x02)
        );
        assert_eq!(
            ClientError::from(TransportError::Io("Broken pipe".to_string())),
            ClientError::ConnectionLost("Broken pipe".to_string())
        );
        assert!(matches!(
            ClientError::from(TransportError::Unreachable("refused".to_string())),
            ClientError::Transport(_)
        ));
    }

    #[test]
    fn test_retry_classification() {
        assert!(!ClientError::invalid_argument("qty").is_retryable());
        assert!(!ClientError::ProtocolError(0x03).is_retryable());
        assert!(ClientError::NotConnected.is_retryable());
        assert!(ClientError::timeout("slow").is_retryable());

        assert!(ClientError::connection_lost("reset").needs_reconnect());
        assert!(ClientError::timeout("slow").needs_reconnect());
        assert!(!ClientError::NotConnected.needs_reconnect());
        assert!(!ClientError::ProtocolError(0x01).needs_reconnect());
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(
            ClientError::ProtocolError(2).to_string(),
            "Modbus exception code 0x02"
        );
    }
}
