//! Connection state machine.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──transport up──▶ HandshakeInFlight
//!       ▲                        ▲                              │
//!       │                        │ ready              handshake accepted
//!       │                   Reconnecting                        ▼
//!       └──────disconnected─────────────────────────────── Connected
//! ```
//!
//! `Disconnected` is reachable from every state and `Reconnecting` from every
//! state. There is no terminal state. The machine is pure; the client owns
//! I/O and publishes each new state on a `watch` channel.

use std::fmt;

use crate::error::ClientError;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Transport opening.
    Connecting,
    /// Transport up, handshake reply pending.
    HandshakeInFlight,
    /// Ready for requests.
    Connected,
    /// Tearing down the old transport before opening a new one.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::HandshakeInFlight => "handshake_in_flight",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that move the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Explicit connect request.
    Connect,
    /// The transport signalled it is connected.
    TransportConnected,
    /// A valid handshake reply arrived (or no handshake is needed).
    HandshakeAccepted,
    /// Transport closed, handshake failed, or explicit disconnect.
    Disconnect,
    /// Explicit reconnect request.
    Reconnect,
    /// The old transport is gone; open the next one.
    ReconnectReady,
}

/// Next state for `transition` from `from`, or `None` if not allowed.
pub fn next_state(from: ConnectionState, transition: Transition) -> Option<ConnectionState> {
    use ConnectionState as S;
    use Transition as T;

    match (from, transition) {
        (S::Disconnected, T::Connect) | (S::Reconnecting, T::ReconnectReady) => Some(S::Connecting),
        (S::Connecting, T::TransportConnected) => Some(S::HandshakeInFlight),
        (S::HandshakeInFlight, T::HandshakeAccepted) => Some(S::Connected),
        (_, T::Disconnect) => Some(S::Disconnected),
        (_, T::Reconnect) => Some(S::Reconnecting),
        _ => None,
    }
}

/// Holds exactly one [`ConnectionState`]; [`apply`](Self::apply) is the only mutator.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Start `Disconnected`.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply a transition, returning the new state.
    pub fn apply(&mut self, transition: Transition) -> Result<ConnectionState, ClientError> {
        let next = next_state(self.state, transition).ok_or(ClientError::InvalidTransition {
            from: self.state,
            transition,
        })?;
        self.state = next;
        Ok(next)
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
