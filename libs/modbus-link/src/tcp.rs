//! Modbus TCP binding over tokio-modbus

use async_trait::async_trait;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::operation::{OperationOutput, RegisterOperation};
use crate::transport::{Connector, Endpoint, Session, TransportError};

/// Opens Modbus TCP sessions
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, TransportError> {
        let address = endpoint.address();

        let socket_addr = tokio::net::lookup_host(address.as_str())
            .await
            .map_err(|e| TransportError::Unreachable(format!("resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| TransportError::Unreachable(format!("no address for {}", address)))?;

        match tcp::connect_slave(socket_addr, Slave(endpoint.unit_id)).await {
            Ok(ctx) => {
                tracing::info!("TCP connected: {} ({})", address, socket_addr);
                Ok(Box::new(TcpSession {
                    ctx: Some(ctx),
                    address,
                    alive: true,
                }))
            },
            Err(e) => {
                tracing::debug!("TCP err: {} - {}", address, e);
                Err(TransportError::Unreachable(format!("{}: {}", address, e)))
            },
        }
    }
}

/// One open Modbus TCP connection
pub struct TcpSession {
    ctx: Option<Context>,
    address: String,
    alive: bool,
}

#[async_trait]
impl Session for TcpSession {
    async fn submit(&mut self, op: &RegisterOperation) -> Result<OperationOutput, TransportError> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| TransportError::Io("session closed".to_string()))?;

        // Stays false if the call is abandoned mid-frame
        self.alive = false;
        match call(ctx, op).await {
            Ok(Ok(output)) => {
                self.alive = true;
                Ok(output)
            },
            Ok(Err(code)) => {
                self.alive = true;
                Err(TransportError::Exception(u8::from(code)))
            },
            Err(e) => {
                tracing::debug!("TCP err: {} - {}", self.address, e);
                Err(TransportError::Io(e.to_string()))
            },
        }
    }

    fn is_alive(&self) -> bool {
        self.alive && self.ctx.is_some()
    }

    async fn close(&mut self) {
        if self.ctx.take().is_some() {
            self.alive = false;
            tracing::info!("TCP disconnected: {}", self.address);
        }
    }
}

async fn call(ctx: &mut Context, op: &RegisterOperation) -> tokio_modbus::Result<OperationOutput> {
    let output = match op {
        RegisterOperation::ReadHolding {
            start_address,
            quantity,
        } => ctx
            .read_holding_registers(*start_address, *quantity)
            .await?
            .map(OperationOutput::Registers),
        RegisterOperation::ReadInput {
            start_address,
            quantity,
        } => ctx
            .read_input_registers(*start_address, *quantity)
            .await?
            .map(OperationOutput::Registers),
        RegisterOperation::ReadCoils {
            start_address,
            quantity,
        } => ctx
            .read_coils(*start_address, *quantity)
            .await?
            .map(OperationOutput::Coils),
        RegisterOperation::ReadDiscrete {
            start_address,
            quantity,
        } => ctx
            .read_discrete_inputs(*start_address, *quantity)
            .await?
            .map(OperationOutput::Coils),
        RegisterOperation::WriteSingleRegister { address, value } => ctx
            .write_single_register(*address, *value)
            .await?
            .map(|()| OperationOutput::Written),
        RegisterOperation::WriteMultipleRegisters {
            start_address,
            values,
        } => ctx
            .write_multiple_registers(*start_address, values)
            .await?
            .map(|()| OperationOutput::Written),
        RegisterOperation::WriteSingleCoil { address, value } => ctx
            .write_single_coil(*address, *value)
            .await?
            .map(|()| OperationOutput::Written),
        RegisterOperation::WriteMultipleCoils {
            start_address,
            values,
        } => ctx
            .write_multiple_coils(*start_address, values)
            .await?
            .map(|()| OperationOutput::Written),
    };
    Ok(output)
}
