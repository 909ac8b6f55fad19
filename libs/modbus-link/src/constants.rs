//! Modbus protocol limits and client defaults
//!
//! Quantity limits follow the Modbus application protocol:
//! - Maximum PDU size: 253 bytes
//! - Register reads: 1 + 1 + (N × 2) ≤ 253 → N ≤ 125
//! - Coil reads: 1 + 1 + ceil(N / 8) ≤ 253 → N ≤ 2000 (standard limit)

// ============================================================================
// Quantity Limits
// ============================================================================

/// Maximum number of registers per request (FC03/FC04/FC16)
pub const MODBUS_MAX_REGISTERS: usize = 125;

/// Maximum number of coils / discrete inputs per request (FC01/FC02/FC15)
pub const MODBUS_MAX_COILS: usize = 2000;

/// Highest addressable register/coil
pub const MODBUS_MAX_ADDRESS: usize = u16::MAX as usize;

// ============================================================================
// Client Defaults
// ============================================================================

/// Standard Modbus TCP port
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Request (and connect) timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Fixed reconnect interval after an error
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 10_000;

/// Consecutive Error -> Disconnected cycles before giving up
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Scheduled read period while connected
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Scheduled read used by the gateway firmware: 2 input registers at 199
pub const DEFAULT_SCHEDULED_ADDRESS: u16 = 199;
pub const DEFAULT_SCHEDULED_QUANTITY: u16 = 2;
pub const DEFAULT_SCHEDULED_KEY: &str = "modbus/input/199";

// ============================================================================
// Queue Capacities
// ============================================================================

/// Pending caller requests waiting for the polling loop
pub const REQUEST_QUEUE_CAPACITY: usize = 32;

/// Status indicator color commands (matches the LED task queue depth)
pub const INDICATOR_QUEUE_CAPACITY: usize = 5;
