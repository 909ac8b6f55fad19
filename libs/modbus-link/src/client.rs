//! Modbus client facade
//!
//! The public handle. `start` performs the first connect inline and then
//! hands the session to a background [`PollingLoop`]; every read and write
//! after that is a message to the loop, answered through a oneshot channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, PollingConfig};
use crate::constants::REQUEST_QUEUE_CAPACITY;
use crate::dispatcher::{check_payload_len, copy_payload, Dispatcher};
use crate::error::{ClientError, Result};
use crate::logger::LinkLogger;
use crate::machine::ConnectionStateMachine;
use crate::operation::{OperationOutput, ReadKind, RegisterOperation};
use crate::polling::{Command, PollingLoop};
use crate::sink::{IndicatorSink, PublishSink};
use crate::state::ConnectionState;
use crate::tcp::TcpConnector;
use crate::transport::Connector;

/// Running polling loop
struct LoopHandle {
    requests: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Modbus TCP master client
pub struct ModbusClient {
    config: ClientConfig,
    polling: PollingConfig,
    connector: Arc<dyn Connector>,
    publisher: Option<Arc<dyn PublishSink>>,
    indicator: Option<IndicatorSink>,
    auto_reconnect: Arc<AtomicBool>,
    retries: Arc<AtomicU8>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Serializes start/stop
    lifecycle: tokio::sync::Mutex<()>,
    runtime: parking_lot::Mutex<Option<LoopHandle>>,
    logger: LinkLogger,
}

impl ModbusClient {
    /// Create a client using the Modbus TCP transport
    pub fn init(config: ClientConfig) -> Result<Self> {
        Self::new(config, TcpConnector::new())
    }

    /// Create a client over any transport binding
    pub fn new(config: ClientConfig, connector: impl Connector) -> Result<Self> {
        let config = config.normalized()?;
        let logger = LinkLogger::new(&config.endpoint());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        logger.log_init(&format!(
            "timeout {}ms, retry every {}ms up to {} times, auto_reconnect={}",
            config.timeout_ms, config.retry_interval_ms, config.max_retries, config.auto_reconnect
        ));

        Ok(Self {
            auto_reconnect: Arc::new(AtomicBool::new(config.auto_reconnect)),
            config,
            polling: PollingConfig::default(),
            connector: Arc::new(connector),
            publisher: None,
            indicator: None,
            retries: Arc::new(AtomicU8::new(0)),
            state_tx: Arc::new(state_tx),
            state_rx,
            lifecycle: tokio::sync::Mutex::new(()),
            runtime: parking_lot::Mutex::new(None),
            logger,
        })
    }

    /// Replace the polling settings; applies from the next `start`
    pub fn with_polling(mut self, polling: PollingConfig) -> Result<Self> {
        self.polling = polling.normalized()?;
        Ok(self)
    }

    pub fn with_publish_sink(mut self, sink: Arc<dyn PublishSink>) -> Self {
        self.publisher = Some(sink);
        self
    }

    pub fn with_indicator(mut self, indicator: IndicatorSink) -> Self {
        self.indicator = Some(indicator);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect and launch the polling loop
    ///
    /// The loop is spawned even when the first connect fails, so background
    /// reconnection proceeds; the connect error is still returned. A running
    /// client is left alone unless it is in ERROR, in which case it is
    /// restarted with a fresh retry budget.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let running = self
            .runtime
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished());
        if running {
            if self.get_state() != ConnectionState::Error {
                tracing::debug!(link = %self.logger.link(), "Client already running");
                return Ok(());
            }
            self.logger.log_init("restarting from ERROR");
        }
        self.shutdown_loop().await;

        let mut machine = ConnectionStateMachine::new(
            &self.config,
            Arc::clone(&self.connector),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.retries),
            self.logger.clone(),
        )
        .with_indicator(self.indicator.clone());

        let first_connect = machine.connect().await;

        let (requests, commands) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let polling_loop = PollingLoop::new(
            machine,
            Dispatcher::new(self.config.timeout(), self.logger.clone()),
            self.polling.clone(),
            Arc::clone(&self.auto_reconnect),
            commands,
            cancel.clone(),
        )
        .retry_interval(self.config.retry_interval())
        .publisher(self.publisher.clone());

        let task = tokio::spawn(polling_loop.run());
        *self.runtime.lock() = Some(LoopHandle {
            requests,
            cancel,
            task,
        });

        if let Err(e) = &first_connect {
            tracing::warn!(
                link = %self.logger.link(),
                "Initial connect failed: {}, reconnecting in background",
                e
            );
        }
        first_connect
    }

    /// Stop the polling loop and close the session; safe to call repeatedly
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.shutdown_loop().await {
            tracing::info!(link = %self.logger.link(), "Client stopped");
        }
    }

    /// Stop and release the client
    pub async fn destroy(self) {
        self.stop().await;
    }

    async fn shutdown_loop(&self) -> bool {
        let Some(handle) = self.runtime.lock().take() else {
            return false;
        };

        handle.cancel.cancel();
        drop(handle.requests);
        if let Err(e) = handle.task.await {
            tracing::error!(link = %self.logger.link(), "Polling task failed: {}", e);
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn get_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Toggle background reconnection; takes effect at the next retry
    pub fn set_auto_reconnect(&self, enabled: bool) {
        let previous = self.auto_reconnect.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            tracing::info!(link = %self.logger.link(), "Auto reconnect {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::Relaxed)
    }

    /// Consecutive reconnect cycles since the last successful open
    pub fn retry_count(&self) -> u8 {
        self.retries.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Register access
    // ========================================================================

    /// Submit any operation to the polling loop and wait for its result
    pub async fn execute(&self, operation: RegisterOperation) -> Result<OperationOutput> {
        operation.validate()?;
        if !self.get_state().is_connected() {
            return Err(ClientError::NotConnected);
        }

        let requests = match self.runtime.lock().as_ref() {
            Some(handle) => handle.requests.clone(),
            None => return Err(ClientError::NotConnected),
        };

        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        let name = operation.name();
        let (reply, response) = oneshot::channel();

        let exchange = async move {
            requests
                .send(Command::Execute {
                    operation,
                    reply,
                    deadline,
                })
                .await
                .map_err(|_| ClientError::NotConnected)?;
            response.await.map_err(|_| ClientError::NotConnected)?
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::timeout(format!(
                "{} got no reply within {}ms",
                name,
                timeout.as_millis()
            ))),
        }
    }

    pub async fn read_holding(&self, start_address: u16, quantity: u16) -> Result<Vec<u16>> {
        self.execute(RegisterOperation::read(ReadKind::Holding, start_address, quantity))
            .await?
            .into_registers()
    }

    pub async fn read_input(&self, start_address: u16, quantity: u16) -> Result<Vec<u16>> {
        self.execute(RegisterOperation::read(ReadKind::Input, start_address, quantity))
            .await?
            .into_registers()
    }

    pub async fn read_coils(&self, start_address: u16, quantity: u16) -> Result<Vec<bool>> {
        self.execute(RegisterOperation::read(ReadKind::Coils, start_address, quantity))
            .await?
            .into_coils()
    }

    pub async fn read_discrete(&self, start_address: u16, quantity: u16) -> Result<Vec<bool>> {
        self.execute(RegisterOperation::read(ReadKind::Discrete, start_address, quantity))
            .await?
            .into_coils()
    }

    pub async fn write_single_register(&self, address: u16, value: u16) -> Result<()> {
        self.execute(RegisterOperation::WriteSingleRegister { address, value })
            .await
            .map(|_| ())
    }

    pub async fn write_multiple_registers(
        &self,
        start_address: u16,
        quantity: u16,
        values: &[u16],
    ) -> Result<()> {
        check_payload_len(quantity, values.len())?;
        let values = copy_payload(values)?;
        self.execute(RegisterOperation::WriteMultipleRegisters {
            start_address,
            values,
        })
        .await
        .map(|_| ())
    }

    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<()> {
        self.execute(RegisterOperation::WriteSingleCoil { address, value })
            .await
            .map(|_| ())
    }

    pub async fn write_multiple_coils(
        &self,
        start_address: u16,
        quantity: u16,
        values: &[bool],
    ) -> Result<()> {
        check_payload_len(quantity, values.len())?;
        let values = copy_payload(values)?;
        self.execute(RegisterOperation::WriteMultipleCoils {
            start_address,
            values,
        })
        .await
        .map(|_| ())
    }
}

impl Drop for ModbusClient {
    fn drop(&mut self) {
        // The loop closes the session itself once cancelled
        if let Some(handle) = self.runtime.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

impl fmt::Debug for ModbusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusClient")
            .field("config", &self.config)
            .field("state", &self.get_state())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::test_utils::MockConnector;

    fn client(connector: &MockConnector) -> ModbusClient {
        ModbusClient::new(ClientConfig::new("mock", 502, 1), connector.clone())
            .unwrap()
            .with_polling(PollingConfig::requests_only())
            .unwrap()
    }

    #[test]
    fn test_init_applies_defaults() {
        let config = ClientConfig {
            port: 0,
            timeout_ms: 0,
            ..ClientConfig::new("10.0.0.5", 0, 1)
        };
        let client = ModbusClient::init(config).unwrap();
        assert_eq!(client.config().port, 502);
        assert_eq!(client.config().timeout_ms, 5000);
        assert_eq!(client.get_state(), ConnectionState::Disconnected);
        assert!(!client.is_running());
    }

    #[test]
    fn test_init_rejects_empty_host() {
        let err = ModbusClient::init(ClientConfig::default()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_requests_before_start() {
        let connector = MockConnector::new();
        let client = client(&connector);

        assert_eq!(
            client.read_holding(0, 1).await,
            Err(ClientError::NotConnected)
        );
        assert!(matches!(
            client.read_holding(0, 0).await,
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_payload_length_mismatch() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.start().await.unwrap();

        let err = client
            .write_multiple_registers(0, 3, &[1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));

        let err = client
            .write_multiple_coils(0, 1, &[true, false])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        assert_eq!(connector.submits(), 0);

        client.stop().await;
    }

    #[tokio::test]
    async fn test_coil_round_trip() {
        let connector = MockConnector::new();
        let client = client(&connector);
        client.start().await.unwrap();

        client
            .write_multiple_coils(5, 3, &[true, false, true])
            .await
            .unwrap();
        client.write_single_coil(8, true).await.unwrap();
        assert_eq!(
            client.read_coils(5, 4).await.unwrap(),
            vec![true, false, true, true]
        );
        assert!(connector.coil(7));

        connector.set_discrete(3, true);
        assert_eq!(client.read_discrete(2, 2).await.unwrap(), vec![false, true]);

        client.destroy().await;
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_set_auto_reconnect() {
        let connector = MockConnector::new();
        let client = client(&connector);
        assert!(client.auto_reconnect());
        client.set_auto_reconnect(false);
        assert!(!client.auto_reconnect());
    }
}
