//! Register operations
//!
//! Typed requests over the four Modbus data tables and their results.

use serde::{Deserialize, Serialize};

use crate::constants::{MODBUS_MAX_ADDRESS, MODBUS_MAX_COILS, MODBUS_MAX_REGISTERS};
use crate::error::{ClientError, Result};

/// Readable Modbus data table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadKind {
    /// Holding registers (FC03)
    Holding,
    /// Input registers (FC04)
    Input,
    /// Coils (FC01)
    Coils,
    /// Discrete inputs (FC02)
    Discrete,
}

impl ReadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadKind::Holding => "holding",
            ReadKind::Input => "input",
            ReadKind::Coils => "coils",
            ReadKind::Discrete => "discrete",
        }
    }
}

impl std::fmt::Display for ReadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single register/coil request
///
/// Write variants own their payload; the quantity of a write is the payload
/// length, so a declared quantity can never disagree with the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOperation {
    ReadHolding { start_address: u16, quantity: u16 },
    ReadInput { start_address: u16, quantity: u16 },
    ReadCoils { start_address: u16, quantity: u16 },
    ReadDiscrete { start_address: u16, quantity: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { start_address: u16, values: Vec<u16> },
    WriteSingleCoil { address: u16, value: bool },
    WriteMultipleCoils { start_address: u16, values: Vec<bool> },
}

impl RegisterOperation {
    /// Build a read of the given table
    pub fn read(kind: ReadKind, start_address: u16, quantity: u16) -> Self {
        match kind {
            ReadKind::Holding => RegisterOperation::ReadHolding {
                start_address,
                quantity,
            },
            ReadKind::Input => RegisterOperation::ReadInput {
                start_address,
                quantity,
            },
            ReadKind::Coils => RegisterOperation::ReadCoils {
                start_address,
                quantity,
            },
            ReadKind::Discrete => RegisterOperation::ReadDiscrete {
                start_address,
                quantity,
            },
        }
    }

    /// Modbus function code
    pub fn function_code(&self) -> u8 {
        match self {
            RegisterOperation::ReadCoils { .. } => 0x01,
            RegisterOperation::ReadDiscrete { .. } => 0x02,
            RegisterOperation::ReadHolding { .. } => 0x03,
            RegisterOperation::ReadInput { .. } => 0x04,
            RegisterOperation::WriteSingleCoil { .. } => 0x05,
            RegisterOperation::WriteSingleRegister { .. } => 0x06,
            RegisterOperation::WriteMultipleCoils { .. } => 0x0F,
            RegisterOperation::WriteMultipleRegisters { .. } => 0x10,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegisterOperation::ReadHolding { .. } => "read_holding",
            RegisterOperation::ReadInput { .. } => "read_input",
            RegisterOperation::ReadCoils { .. } => "read_coils",
            RegisterOperation::ReadDiscrete { .. } => "read_discrete",
            RegisterOperation::WriteSingleRegister { .. } => "write_single_register",
            RegisterOperation::WriteMultipleRegisters { .. } => "write_multiple_registers",
            RegisterOperation::WriteSingleCoil { .. } => "write_single_coil",
            RegisterOperation::WriteMultipleCoils { .. } => "write_multiple_coils",
        }
    }

    pub fn start_address(&self) -> u16 {
        match self {
            RegisterOperation::ReadHolding { start_address, .. }
            | RegisterOperation::ReadInput { start_address, .. }
            | RegisterOperation::ReadCoils { start_address, .. }
            | RegisterOperation::ReadDiscrete { start_address, .. }
            | RegisterOperation::WriteMultipleRegisters { start_address, .. }
            | RegisterOperation::WriteMultipleCoils { start_address, .. } => *start_address,
            RegisterOperation::WriteSingleRegister { address, .. }
            | RegisterOperation::WriteSingleCoil { address, .. } => *address,
        }
    }

    /// Number of registers/coils touched by this operation
    pub fn quantity(&self) -> usize {
        match self {
            RegisterOperation::ReadHolding { quantity, .. }
            | RegisterOperation::ReadInput { quantity, .. }
            | RegisterOperation::ReadCoils { quantity, .. }
            | RegisterOperation::ReadDiscrete { quantity, .. } => *quantity as usize,
            RegisterOperation::WriteMultipleRegisters { values, .. } => values.len(),
            RegisterOperation::WriteMultipleCoils { values, .. } => values.len(),
            RegisterOperation::WriteSingleRegister { .. }
            | RegisterOperation::WriteSingleCoil { .. } => 1,
        }
    }

    pub fn is_write(&self) -> bool {
        self.function_code() >= 0x05
    }

    /// Bit-addressed tables (coils, discrete inputs)
    pub fn is_bit_access(&self) -> bool {
        matches!(
            self,
            RegisterOperation::ReadCoils { .. }
                | RegisterOperation::ReadDiscrete { .. }
                | RegisterOperation::WriteSingleCoil { .. }
                | RegisterOperation::WriteMultipleCoils { .. }
        )
    }

    pub fn max_quantity(&self) -> usize {
        if self.is_bit_access() {
            MODBUS_MAX_COILS
        } else {
            MODBUS_MAX_REGISTERS
        }
    }

    /// Check quantity and address bounds
    pub fn validate(&self) -> Result<()> {
        let quantity = self.quantity();
        let max = self.max_quantity();
        if quantity == 0 || quantity > max {
            return Err(ClientError::invalid_argument(format!(
                "{} quantity {} outside 1..={}",
                self.name(),
                quantity,
                max
            )));
        }

        let start = self.start_address() as usize;
        let last = start + quantity - 1;
        if last > MODBUS_MAX_ADDRESS {
            return Err(ClientError::invalid_argument(format!(
                "{} address range {}..={} exceeds 0x{:04X}",
                self.name(),
                start,
                last,
                MODBUS_MAX_ADDRESS
            )));
        }

        Ok(())
    }
}

/// Result of a successful operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OperationOutput {
    /// Register values, one per requested register
    Registers(Vec<u16>),
    /// Bit values, one per requested coil/input
    Coils(Vec<bool>),
    /// Write acknowledged
    Written,
}

impl OperationOutput {
    pub fn len(&self) -> usize {
        match self {
            OperationOutput::Registers(values) => values.len(),
            OperationOutput::Coils(values) => values.len(),
            OperationOutput::Written => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_registers(self) -> Result<Vec<u16>> {
        match self {
            OperationOutput::Registers(values) => Ok(values),
            other => Err(ClientError::connection_lost(format!(
                "expected register values, got {other:?}"
            ))),
        }
    }

    pub fn into_coils(self) -> Result<Vec<bool>> {
        match self {
            OperationOutput::Coils(values) => Ok(values),
            other => Err(ClientError::connection_lost(format!(
                "expected coil values, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_function_codes() {
        assert_eq!(RegisterOperation::read(ReadKind::Coils, 0, 1).function_code(), 1);
        assert_eq!(RegisterOperation::read(ReadKind::Discrete, 0, 1).function_code(), 2);
        assert_eq!(RegisterOperation::read(ReadKind::Holding, 0, 1).function_code(), 3);
        assert_eq!(RegisterOperation::read(ReadKind::Input, 0, 1).function_code(), 4);
        let write = RegisterOperation::WriteMultipleRegisters {
            start_address: 0,
            values: vec![1, 2],
        };
        assert_eq!(write.function_code(), 0x10);
        assert!(write.is_write());
        assert!(!RegisterOperation::read(ReadKind::Input, 0, 1).is_write());
    }

    #[test]
    fn test_register_quantity_bounds() {
        for quantity in [0u16, 126, 2000] {
            let op = RegisterOperation::read(ReadKind::Holding, 0, quantity);
            assert!(matches!(op.validate(), Err(ClientError::InvalidArgument(_))));
        }
        assert!(RegisterOperation::read(ReadKind::Input, 0, 1).validate().is_ok());
        assert!(RegisterOperation::read(ReadKind::Input, 0, 125).validate().is_ok());
    }

    #[test]
    fn test_coil_quantity_bounds() {
        assert!(RegisterOperation::read(ReadKind::Coils, 0, 2000).validate().is_ok());
        assert!(RegisterOperation::read(ReadKind::Discrete, 0, 2001)
            .validate()
            .is_err());

        let empty = RegisterOperation::WriteMultipleCoils {
            start_address: 0,
            values: Vec::new(),
        };
        assert!(empty.validate().is_err());

        let too_many = RegisterOperation::WriteMultipleRegisters {
            start_address: 0,
            values: vec![0; 126],
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_address_range_overflow() {
        let op = RegisterOperation::read(ReadKind::Holding, 0xFFFF, 2);
        let err = op.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        assert!(RegisterOperation::read(ReadKind::Holding, 0xFFFF, 1)
            .validate()
            .is_ok());
        assert!(RegisterOperation::WriteSingleCoil {
            address: 0xFFFF,
            value: true
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_output_conversion() {
        let output = OperationOutput::Registers(vec![0x1234]);
        assert_eq!(output.len(), 1);
        assert_eq!(output.into_registers().unwrap(), vec![0x1234]);

        let err = OperationOutput::Written.into_coils().unwrap_err();
        assert!(err.needs_reconnect());
    }

    #[test]
    fn test_read_kind_serde() {
        let kind: ReadKind = serde_json::from_str("\"discrete\"").unwrap();
        assert_eq!(kind, ReadKind::Discrete);
        assert_eq!(serde_json::to_string(&ReadKind::Input).unwrap(), "\"input\"");
    }
}
