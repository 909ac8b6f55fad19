//! Connection states and the transition table

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Error => write!(f, "ERROR"),
        }
    }
}

/// Inputs driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Connection attempt begins
    Start,
    OpenSucceeded,
    OpenFailed,
    /// Transport failure on an open session
    LinkLost,
    /// Retry interval passed while in Error
    RetryElapsed,
    /// Client shutdown
    Stop,
}

/// Next state for `event` in `state`, or `None` when the event is not
/// accepted there.
pub fn transition(state: ConnectionState, event: LinkEvent) -> Option<ConnectionState> {
    use ConnectionState::*;
    use LinkEvent::*;

    match (state, event) {
        (Disconnected, Start) => Some(Connecting),
        (Connecting, OpenSucceeded) => Some(Connected),
        (Connecting, OpenFailed) => Some(Error),
        (Connected, LinkLost) => Some(Error),
        (Error, RetryElapsed) => Some(Disconnected),
        (Disconnected, Stop) => None,
        (_, Stop) => Some(Disconnected),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ConnectionState; 4] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Error,
    ];

    const ALL_EVENTS: [LinkEvent; 6] = [
        LinkEvent::Start,
        LinkEvent::OpenSucceeded,
        LinkEvent::OpenFailed,
        LinkEvent::LinkLost,
        LinkEvent::RetryElapsed,
        LinkEvent::Stop,
    ];

    #[test]
    fn test_connection_cycle() {
        let mut state = ConnectionState::default();
        for (event, expected) in [
            (LinkEvent::Start, ConnectionState::Connecting),
            (LinkEvent::OpenFailed, ConnectionState::Error),
            (LinkEvent::RetryElapsed, ConnectionState::Disconnected),
            (LinkEvent::Start, ConnectionState::Connecting),
            (LinkEvent::OpenSucceeded, ConnectionState::Connected),
            (LinkEvent::LinkLost, ConnectionState::Error),
        ] {
            state = transition(state, event).unwrap_or(state);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_no_direct_error_to_connected() {
        for event in ALL_EVENTS {
            assert_ne!(
                transition(ConnectionState::Error, event),
                Some(ConnectionState::Connected)
            );
            assert_ne!(
                transition(ConnectionState::Error, event),
                Some(ConnectionState::Connecting)
            );
        }
    }

    #[test]
    fn test_connected_only_from_connecting() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                if transition(state, event) == Some(ConnectionState::Connected) {
                    assert_eq!(state, ConnectionState::Connecting);
                    assert_eq!(event, LinkEvent::OpenSucceeded);
                }
            }
        }
    }

    #[test]
    fn test_stop_from_any_state() {
        for state in ALL_STATES {
            let next = transition(state, LinkEvent::Stop).unwrap_or(state);
            assert_eq!(next, ConnectionState::Disconnected);
        }
    }

    #[test]
    fn test_rejected_events() {
        assert_eq!(
            transition(ConnectionState::Connected, LinkEvent::Start),
            None
        );
        assert_eq!(
            transition(ConnectionState::Disconnected, LinkEvent::LinkLost),
            None
        );
        assert_eq!(
            transition(ConnectionState::Connected, LinkEvent::RetryElapsed),
            None
        );
    }

    #[test]
    fn test_display_uppercase() {
        assert_eq!(ConnectionState::Connected.to_string(), "CONNECTED");
        assert_eq!(ConnectionState::Error.to_string(), "ERROR");
    }
}
