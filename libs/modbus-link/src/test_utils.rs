//! Scripted in-memory transport for tests
//!
//! `MockConnector` serves the four Modbus tables from hash maps and lets a
//! test inject open failures, hung opens, submit failures, latency and link
//! loss. Sessions assert the single-call-in-flight rule by panicking on
//! re-entrant use.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::operation::{OperationOutput, RegisterOperation};
use crate::transport::{Connector, Endpoint, Session, TransportError};

#[derive(Debug, Default)]
struct RegisterBank {
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    discrete: HashMap<u16, bool>,
    /// (function code, address) -> exception code
    exceptions: HashMap<(u8, u16), u8>,
}

#[derive(Debug, Default)]
struct MockShared {
    bank: Mutex<RegisterBank>,
    failing_opens: AtomicUsize,
    refuse_all: AtomicBool,
    hang_opens: AtomicBool,
    submit_failures: Mutex<VecDeque<TransportError>>,
    latency: Mutex<Duration>,
    generation: AtomicU64,
    in_flight: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    submits: AtomicUsize,
    open_sessions: AtomicUsize,
}

/// Connector handing out in-memory sessions
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    shared: Arc<MockShared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Register bank
    // ========================================================================

    pub fn set_holding(&self, address: u16, value: u16) {
        self.shared.bank.lock().holding.insert(address, value);
    }

    pub fn holding(&self, address: u16) -> u16 {
        self.shared
            .bank
            .lock()
            .holding
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_input(&self, address: u16, value: u16) {
        self.shared.bank.lock().input.insert(address, value);
    }

    pub fn set_coil(&self, address: u16, value: bool) {
        self.shared.bank.lock().coils.insert(address, value);
    }

    pub fn coil(&self, address: u16) -> bool {
        self.shared
            .bank
            .lock()
            .coils
            .get(&address)
            .copied()
            .unwrap_or(false)
    }

    pub fn set_discrete(&self, address: u16, value: bool) {
        self.shared.bank.lock().discrete.insert(address, value);
    }

    /// Answer `function_code` requests touching `address` with an exception
    pub fn set_exception(&self, function_code: u8, address: u16, code: u8) {
        self.shared
            .bank
            .lock()
            .exceptions
            .insert((function_code, address), code);
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Refuse the next `count` opens
    pub fn fail_opens(&self, count: usize) {
        self.shared.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.shared.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Opens never complete
    pub fn hang_opens(&self, hang: bool) {
        self.shared.hang_opens.store(hang, Ordering::SeqCst);
    }

    pub fn fail_next_submit(&self, error: TransportError) {
        self.shared.submit_failures.lock().push_back(error);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock() = latency;
    }

    /// Kill every currently open session
    pub fn drop_link(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    // ========================================================================
    // Counters
    // ========================================================================

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> usize {
        self.shared.submits.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, TransportError> {
        let shared = &self.shared;
        shared.opens.fetch_add(1, Ordering::SeqCst);

        if shared.hang_opens.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let refused = shared.refuse_all.load(Ordering::SeqCst)
            || shared
                .failing_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refused {
            return Err(TransportError::Unreachable(format!(
                "{}: connection refused",
                endpoint.address()
            )));
        }

        shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            shared: Arc::clone(shared),
            generation: shared.generation.load(Ordering::SeqCst),
            closed: false,
        }))
    }
}

/// Session served from the shared register bank
#[derive(Debug)]
pub struct MockSession {
    shared: Arc<MockShared>,
    generation: u64,
    closed: bool,
}

/// Marks a transport call in progress for the lifetime of the guard
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        if flag.swap(true, Ordering::SeqCst) {
            panic!("re-entrant transport call");
        }
        Self(flag)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MockSession {
    fn link_up(&self) -> bool {
        !self.closed && self.generation == self.shared.generation.load(Ordering::SeqCst)
    }

    fn serve(&self, op: &RegisterOperation) -> Result<OperationOutput, TransportError> {
        let mut bank = self.shared.bank.lock();

        let start = op.start_address();
        let span = start as usize..start as usize + op.quantity();
        let fc = op.function_code();
        if let Some(code) = bank
            .exceptions
            .iter()
            .find(|((f, addr), _)| *f == fc && span.contains(&(*addr as usize)))
            .map(|(_, code)| *code)
        {
            return Err(TransportError::Exception(code));
        }

        let registers = |table: &HashMap<u16, u16>, quantity: u16| {
            (0..quantity)
                .map(|i| table.get(&start.wrapping_add(i)).copied().unwrap_or(0))
                .collect::<Vec<_>>()
        };
        let bits = |table: &HashMap<u16, bool>, quantity: u16| {
            (0..quantity)
                .map(|i| table.get(&start.wrapping_add(i)).copied().unwrap_or(false))
                .collect::<Vec<_>>()
        };

        let output = match op {
            RegisterOperation::ReadHolding { quantity, .. } => {
                OperationOutput::Registers(registers(&bank.holding, *quantity))
            },
            RegisterOperation::ReadInput { quantity, .. } => {
                OperationOutput::Registers(registers(&bank.input, *quantity))
            },
            RegisterOperation::ReadCoils { quantity, .. } => {
                OperationOutput::Coils(bits(&bank.coils, *quantity))
            },
            RegisterOperation::ReadDiscrete { quantity, .. } => {
                OperationOutput::Coils(bits(&bank.discrete, *quantity))
            },
            RegisterOperation::WriteSingleRegister { address, value } => {
                bank.holding.insert(*address, *value);
                OperationOutput::Written
            },
            RegisterOperation::WriteMultipleRegisters {
                start_address,
                values,
            } => {
                for (i, value) in values.iter().enumerate() {
                    bank.holding
                        .insert(start_address.wrapping_add(i as u16), *value);
                }
                OperationOutput::Written
            },
            RegisterOperation::WriteSingleCoil { address, value } => {
                bank.coils.insert(*address, *value);
                OperationOutput::Written
            },
            RegisterOperation::WriteMultipleCoils {
                start_address,
                values,
            } => {
                for (i, value) in values.iter().enumerate() {
                    bank.coils.insert(start_address.wrapping_add(i as u16), *value);
                }
                OperationOutput::Written
            },
        };
        Ok(output)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn submit(&mut self, op: &RegisterOperation) -> Result<OperationOutput, TransportError> {
        let _guard = InFlightGuard::enter(&self.shared.in_flight);
        self.shared.submits.fetch_add(1, Ordering::SeqCst);

        let latency = *self.shared.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.link_up() {
            return Err(TransportError::Io("connection reset by peer".to_string()));
        }
        if let Some(error) = self.shared.submit_failures.lock().pop_front() {
            return Err(error);
        }
        self.serve(op)
    }

    fn is_alive(&self) -> bool {
        self.link_up()
    }

    async fn close(&mut self) {
        assert!(!self.closed, "session closed twice");
        self.closed = true;
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::operation::ReadKind;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "mock".to_string(),
            port: 502,
            unit_id: 1,
            timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_register_bank() {
        let connector = MockConnector::new();
        let mut session = connector.open(&endpoint()).await.unwrap();

        session
            .submit(&RegisterOperation::WriteMultipleRegisters {
                start_address: 10,
                values: vec![7, 8],
            })
            .await
            .unwrap();
        let output = session
            .submit(&RegisterOperation::read(ReadKind::Holding, 10, 3))
            .await
            .unwrap();
        assert_eq!(output, OperationOutput::Registers(vec![7, 8, 0]));
        assert_eq!(connector.holding(11), 8);
    }

    #[tokio::test]
    async fn test_fail_opens_counts_down() {
        let connector = MockConnector::new();
        connector.fail_opens(2);

        assert!(connector.open(&endpoint()).await.is_err());
        assert!(connector.open(&endpoint()).await.is_err());
        assert!(connector.open(&endpoint()).await.is_ok());
        assert_eq!(connector.opens(), 3);
        assert_eq!(connector.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_drop_link_only_affects_open_sessions() {
        let connector = MockConnector::new();
        let old = connector.open(&endpoint()).await.unwrap();
        connector.drop_link();
        let new = connector.open(&endpoint()).await.unwrap();

        assert!(!old.is_alive());
        assert!(new.is_alive());
    }

    #[tokio::test]
    #[should_panic(expected = "re-entrant transport call")]
    async fn test_guard_rejects_reentry() {
        let flag = AtomicBool::new(false);
        let _first = InFlightGuard::enter(&flag);
        let _second = InFlightGuard::enter(&flag);
    }
}
