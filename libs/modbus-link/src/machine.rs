//! Connection state machine
//!
//! Owns the transport session. Opening and closing happen only here, so at
//! most one session is open at a time and each one is closed exactly once.
//! Every accepted transition is logged and mirrored to the state watch
//! channel and the status indicator.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::logger::LinkLogger;
use crate::sink::IndicatorSink;
use crate::state::{transition, ConnectionState, LinkEvent};
use crate::transport::{Connector, Endpoint, Session};

pub struct ConnectionStateMachine {
    endpoint: Endpoint,
    max_retries: u8,
    retry_interval_ms: u64,
    connector: Arc<dyn Connector>,
    session: Option<Box<dyn Session>>,
    state: ConnectionState,
    retries: Arc<AtomicU8>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    indicator: Option<IndicatorSink>,
    logger: LinkLogger,
}

impl ConnectionStateMachine {
    pub fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        retries: Arc<AtomicU8>,
        logger: LinkLogger,
    ) -> Self {
        state_tx.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        retries.store(0, Ordering::Relaxed);

        Self {
            endpoint: config.endpoint(),
            max_retries: config.max_retries,
            retry_interval_ms: config.retry_interval_ms,
            connector,
            session: None,
            state: ConnectionState::Disconnected,
            retries,
            state_tx,
            indicator: None,
            logger,
        }
    }

    pub fn with_indicator(mut self, indicator: Option<IndicatorSink>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u8 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Retry budget used up; Error is terminal until the client is restarted
    pub fn is_exhausted(&self) -> bool {
        self.retry_count() >= self.max_retries
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_mut(&mut self) -> Option<&mut (dyn Session + 'static)> {
        self.session.as_deref_mut()
    }

    fn apply(&mut self, event: LinkEvent, reason: &str) -> bool {
        let Some(next) = transition(self.state, event) else {
            tracing::debug!(
                link = %self.logger.link(),
                "Ignored {:?} in {}",
                event,
                self.state
            );
            return false;
        };

        let old = std::mem::replace(&mut self.state, next);
        self.logger.log_status(old, next, reason);
        self.state_tx.send_replace(next);
        if let Some(indicator) = &self.indicator {
            indicator.show_state(next);
        }
        true
    }

    /// Open a session: Disconnected -> Connecting -> Connected | Error
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Error => return Err(ClientError::NotConnected),
            ConnectionState::Disconnected => {
                self.apply(LinkEvent::Start, "connection attempt");
            },
            ConnectionState::Connecting => {},
        }

        self.logger
            .log_connect(&format!("timeout {}ms", self.endpoint.timeout.as_millis()));

        let opened =
            tokio::time::timeout(self.endpoint.timeout, self.connector.open(&self.endpoint)).await;

        let reason = match opened {
            Ok(Ok(session)) => {
                self.session = Some(session);
                self.retries.store(0, Ordering::Relaxed);
                self.apply(LinkEvent::OpenSucceeded, "session opened");
                return Ok(());
            },
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "connect timed out after {}ms",
                self.endpoint.timeout.as_millis()
            ),
        };

        self.apply(LinkEvent::OpenFailed, &reason);
        Err(ClientError::transport(reason))
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    /// Drop the session after a transport failure: Connected -> Error
    pub async fn link_lost(&mut self, reason: &str) {
        self.close_session().await;
        self.apply(LinkEvent::LinkLost, reason);
    }

    /// Check session liveness while connected
    pub async fn ensure_alive(&mut self) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        let alive = self.session.as_ref().is_some_and(|s| s.is_alive());
        if !alive {
            self.link_lost("transport reported link down").await;
        }
        alive
    }

    /// Called once the retry interval has elapsed in Error.
    ///
    /// Moves to Disconnected only with auto-reconnect on and retry budget
    /// left; returns whether the transition happened.
    pub fn retry_elapsed(&mut self, auto_reconnect: bool) -> bool {
        if self.state != ConnectionState::Error || !auto_reconnect || self.is_exhausted() {
            return false;
        }

        let attempt = self.retries.fetch_add(1, Ordering::Relaxed) + 1;
        self.logger.log_retry(
            attempt,
            self.max_retries,
            self.retry_interval_ms,
            "reconnecting",
        );
        self.apply(LinkEvent::RetryElapsed, "retry interval elapsed")
    }

    /// Release the session and return to Disconnected
    pub async fn shutdown(&mut self) {
        self.close_session().await;
        self.apply(LinkEvent::Stop, "client stopped");
    }
}

impl fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("retries", &self.retry_count())
            .field("max_retries", &self.max_retries)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}
