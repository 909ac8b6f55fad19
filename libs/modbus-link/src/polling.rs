//! Polling loop
//!
//! The single task that owns the connection state machine and therefore the
//! transport session. Callers never touch the session; they enqueue commands
//! and wait for the reply. While connected the loop checks link liveness on
//! every poll tick, performs the scheduled read if one is configured and
//! hands each result to the publish sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PollingConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};
use crate::machine::ConnectionStateMachine;
use crate::operation::{OperationOutput, RegisterOperation};
use crate::sink::{Publication, PublishSink};
use crate::state::ConnectionState;

/// Request sent from the facade to the loop
#[derive(Debug)]
pub enum Command {
    Execute {
        operation: RegisterOperation,
        reply: oneshot::Sender<Result<OperationOutput>>,
        /// After this instant the caller has given up
        deadline: Instant,
    },
}

impl Command {
    fn reject(self, error: ClientError) {
        match self {
            Command::Execute { reply, .. } => {
                let _ = reply.send(Err(error));
            },
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

pub struct PollingLoop {
    machine: ConnectionStateMachine,
    dispatcher: Dispatcher,
    polling: PollingConfig,
    retry_interval: Duration,
    auto_reconnect: Arc<AtomicBool>,
    commands: mpsc::Receiver<Command>,
    publisher: Option<Arc<dyn PublishSink>>,
    cancel: CancellationToken,
    gave_up: bool,
}

impl PollingLoop {
    pub fn new(
        machine: ConnectionStateMachine,
        dispatcher: Dispatcher,
        polling: PollingConfig,
        auto_reconnect: Arc<AtomicBool>,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            machine,
            dispatcher,
            polling,
            retry_interval: Duration::from_millis(crate::constants::DEFAULT_RETRY_INTERVAL_MS),
            auto_reconnect,
            commands,
            publisher: None,
            cancel,
            gave_up: false,
        }
    }

    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn publisher(mut self, publisher: Option<Arc<dyn PublishSink>>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Run until cancelled or every request sender is gone
    pub async fn run(mut self) {
        let mut poll_tick = tokio::time::interval(self.polling.interval());
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            "Polling loop started, interval {}ms, scheduled read {}",
            self.polling.interval_ms,
            self.polling
                .scheduled_read
                .as_ref()
                .map_or("disabled", |r| r.key.as_str())
        );

        loop {
            let flow = match self.machine.state() {
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    self.connect_step().await
                },
                ConnectionState::Connected => self.connected_step(&mut poll_tick).await,
                ConnectionState::Error => self.error_step().await,
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        self.machine.shutdown().await;
        self.commands.close();
        self.reject_pending();
        tracing::debug!("Polling loop stopped");
    }

    async fn connect_step(&mut self) -> Flow {
        self.reject_pending();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Flow::Stop,
            result = self.machine.connect() => {
                if let Err(e) = result {
                    tracing::debug!("Reconnect failed: {}", e);
                }
                Flow::Continue
            }
        }
    }

    async fn connected_step(&mut self, poll_tick: &mut Interval) -> Flow {
        if !self.machine.ensure_alive().await {
            return Flow::Continue;
        }

        // The tick also drives liveness checks when nothing is scheduled
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Flow::Stop,
            _ = poll_tick.tick() => {
                if self.machine.ensure_alive().await {
                    self.scheduled_read().await;
                }
                Flow::Continue
            }
            command = self.commands.recv() => match command {
                Some(command) => {
                    self.handle_command(command).await;
                    Flow::Continue
                },
                None => Flow::Stop,
            },
        }
    }

    async fn error_step(&mut self) -> Flow {
        self.reject_pending();

        if self.machine.is_exhausted() && !self.gave_up {
            tracing::error!(
                "Reconnect budget exhausted after {} retries, client stays in ERROR until restarted",
                self.machine.retry_count()
            );
            self.gave_up = true;
        }

        let wait = tokio::time::sleep(self.retry_interval);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Flow::Stop,
                _ = &mut wait => break,
                command = self.commands.recv() => match command {
                    Some(command) => command.reject(ClientError::NotConnected),
                    None => return Flow::Stop,
                },
            }
        }

        self.machine
            .retry_elapsed(self.auto_reconnect.load(Ordering::Relaxed));
        Flow::Continue
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Execute {
                operation,
                reply,
                deadline,
            } => {
                if reply.is_closed() || Instant::now() >= deadline {
                    tracing::debug!("Discarded {} request, caller gave up", operation.name());
                    return;
                }
                let result = self.execute(&operation).await;
                // Late result is dropped if the caller timed out meanwhile
                let _ = reply.send(result);
            },
        }
    }

    async fn execute(&mut self, operation: &RegisterOperation) -> Result<OperationOutput> {
        let state = self.machine.state();
        let result = self
            .dispatcher
            .execute(state, self.machine.session_mut(), operation)
            .await;

        if let Err(e) = &result {
            if e.needs_reconnect() {
                self.machine.link_lost(&e.to_string()).await;
            }
        }
        result
    }

    async fn scheduled_read(&mut self) {
        let Some(read) = self.polling.scheduled_read.clone() else {
            return;
        };

        match self.execute(&read.operation()).await {
            Ok(values) => {
                if let Some(publisher) = &self.publisher {
                    publisher.publish(&Publication::new(
                        read.key,
                        read.kind,
                        read.start_address,
                        values,
                    ));
                }
            },
            Err(e) => tracing::warn!("Scheduled read {} failed: {}", read.key, e),
        }
    }

    fn reject_pending(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            command.reject(ClientError::NotConnected);
        }
    }
}
