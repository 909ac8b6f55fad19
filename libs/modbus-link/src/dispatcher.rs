//! Request dispatcher
//!
//! Validates an operation, carries it over the session under the request
//! timeout and shapes the response into a buffer of exactly the requested
//! size.

use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::logger::LinkLogger;
use crate::operation::{OperationOutput, RegisterOperation};
use crate::state::ConnectionState;
use crate::transport::Session;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    timeout: Duration,
    logger: LinkLogger,
}

impl Dispatcher {
    pub fn new(timeout: Duration, logger: LinkLogger) -> Self {
        Self { timeout, logger }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute one operation on the current session
    ///
    /// Bounds are checked before the connection state, so an invalid request
    /// never reaches the transport whatever the state.
    pub async fn execute<S>(
        &self,
        state: ConnectionState,
        session: Option<&mut S>,
        op: &RegisterOperation,
    ) -> Result<OperationOutput>
    where
        S: Session + ?Sized,
    {
        op.validate()?;

        let session = match session {
            Some(session) if state.is_connected() => session,
            _ => return Err(ClientError::NotConnected),
        };

        self.logger.log_request(op);

        let output = match tokio::time::timeout(self.timeout, session.submit(op)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let err = ClientError::from(e);
                self.logger.log_failure(op, &err);
                return Err(err);
            },
            Err(_) => {
                let err = ClientError::timeout(format!(
                    "{} exceeded {}ms",
                    op.name(),
                    self.timeout.as_millis()
                ));
                self.logger.log_failure(op, &err);
                return Err(err);
            },
        };

        let output = shape_response(op, output)?;
        self.logger.log_response(op, &output);
        Ok(output)
    }
}

/// Fit the transport's answer to the request
fn shape_response(op: &RegisterOperation, output: OperationOutput) -> Result<OperationOutput> {
    let quantity = op.quantity();

    match (op, output) {
        (
            RegisterOperation::ReadHolding { .. } | RegisterOperation::ReadInput { .. },
            OperationOutput::Registers(values),
        ) => {
            if values.len() != quantity {
                return Err(ClientError::connection_lost(format!(
                    "{} returned {} registers, expected {}",
                    op.name(),
                    values.len(),
                    quantity
                )));
            }
            Ok(OperationOutput::Registers(copy_payload(&values)?))
        },
        (
            RegisterOperation::ReadCoils { .. } | RegisterOperation::ReadDiscrete { .. },
            OperationOutput::Coils(values),
        ) => {
            // Coil responses are padded to whole bytes
            if values.len() < quantity {
                return Err(ClientError::connection_lost(format!(
                    "{} returned {} bits, expected {}",
                    op.name(),
                    values.len(),
                    quantity
                )));
            }
            Ok(OperationOutput::Coils(copy_payload(&values[..quantity])?))
        },
        (_, OperationOutput::Written) if op.is_write() => Ok(OperationOutput::Written),
        (_, other) => Err(ClientError::connection_lost(format!(
            "{} got mismatched response {:?}",
            op.name(),
            other
        ))),
    }
}

/// Copy a slice into a freshly allocated buffer of exactly its length
pub(crate) fn copy_payload<T: Copy>(values: &[T]) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(values.len()).map_err(|e| {
        ClientError::resource_exhausted(format!("{} element buffer: {}", values.len(), e))
    })?;
    buf.extend_from_slice(values);
    Ok(buf)
}

/// Declared quantity must match the payload handed in by the caller
pub(crate) fn check_payload_len(quantity: u16, len: usize) -> Result<()> {
    if quantity as usize != len {
        return Err(ClientError::invalid_argument(format!(
            "quantity {} does not match payload length {}",
            quantity, len
        )));
    }
    Ok(())
}
