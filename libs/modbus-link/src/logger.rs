//! Link-scoped logging
//!
//! Every line is prefixed with the device address so several clients in one
//! process stay distinguishable.

use std::sync::Arc;

use crate::operation::{OperationOutput, RegisterOperation};
use crate::state::ConnectionState;
use crate::transport::Endpoint;

const PROTOCOL: &str = "Modbus TCP";

/// Structured log helper for one device link
#[derive(Debug, Clone)]
pub struct LinkLogger {
    link: Arc<str>,
}

impl LinkLogger {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            link: Arc::from(endpoint.to_string()),
        }
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    /// Log initialization step
    pub fn log_init(&self, message: &str) {
        tracing::info!(link = %self.link, "[INIT] {} - {}", PROTOCOL, message);
    }

    /// Log connection attempt
    pub fn log_connect(&self, details: &str) {
        tracing::info!(
            link = %self.link,
            "[CONNECT] {} to {} - {}",
            PROTOCOL,
            self.link,
            details
        );
    }

    /// Log connection status change
    pub fn log_status(&self, old_state: ConnectionState, new_state: ConnectionState, reason: &str) {
        if new_state == ConnectionState::Error {
            tracing::warn!(link = %self.link, "[STATUS] {} -> {} - {}", old_state, new_state, reason);
        } else {
            tracing::info!(link = %self.link, "[STATUS] {} -> {} - {}", old_state, new_state, reason);
        }
    }

    /// Log retry attempt
    pub fn log_retry(&self, attempt: u8, max_attempts: u8, delay_ms: u64, reason: &str) {
        tracing::warn!(
            link = %self.link,
            "[RETRY] Attempt {}/{}, delay {}ms - {}",
            attempt,
            max_attempts,
            delay_ms,
            reason
        );
    }

    pub fn log_request(&self, op: &RegisterOperation) {
        tracing::debug!(
            link = %self.link,
            "[TX] FC{:02X} {} addr={} qty={}",
            op.function_code(),
            op.name(),
            op.start_address(),
            op.quantity()
        );
    }

    pub fn log_response(&self, op: &RegisterOperation, output: &OperationOutput) {
        tracing::debug!(
            link = %self.link,
            "[RX] FC{:02X} {} values={}",
            op.function_code(),
            op.name(),
            output.len()
        );
    }

    pub fn log_failure(&self, op: &RegisterOperation, error: &dyn std::fmt::Display) {
        tracing::warn!(
            link = %self.link,
            "[ERR] FC{:02X} {} addr={} - {}",
            op.function_code(),
            op.name(),
            op.start_address(),
            error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "10.0.0.5".to_string(),
            port: 502,
            unit_id: 1,
            timeout: Duration::from_millis(5000),
        }
    }

    #[traced_test]
    #[test]
    fn test_status_line_format() {
        let logger = LinkLogger::new(&endpoint());
        logger.log_status(
            ConnectionState::Connecting,
            ConnectionState::Error,
            "connection refused",
        );
        assert!(logs_contain(
            "[STATUS] CONNECTING -> ERROR - connection refused"
        ));
    }

    #[traced_test]
    #[test]
    fn test_retry_line_format() {
        let logger = LinkLogger::new(&endpoint());
        logger.log_retry(2, 3, 10_000, "reconnect");
        assert!(logs_contain("[RETRY] Attempt 2/3, delay 10000ms - reconnect"));
        assert_eq!(logger.link(), "10.0.0.5:502 unit=1");
    }
}
