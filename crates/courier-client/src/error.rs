//! Client error types.
//!
//! [`ClientError`] is what client methods return. [`RequestError`] fails one
//! [`ResponseFuture`](crate::ResponseFuture) and never the client.

use thiserror::Error;

use crate::state::{ConnectionState, Transition};

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client is not in the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// The state machine refused a transition.
    #[error("cannot {transition:?} while {from:?}")]
    InvalidTransition {
        /// State at the time of the attempt.
        from: ConnectionState,
        /// Attempted transition.
        transition: Transition,
    },

    /// The transport could not be opened or failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding a request or decoding a response failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The outbound queue toward the transport is full.
    #[error("send queue full")]
    SendQueueFull,

    /// The handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A response could not be matched to a request.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// A submitted request failed.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Why one pending request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The connection dropped before the response arrived.
    #[error("connection lost before response")]
    ConnectionLost,
    /// The deadline passed before the response arrived.
    #[error("request timed out")]
    Timeout,
    /// The client went away without resolving the request.
    #[error("request cancelled")]
    Cancelled,
}

/// Response/request matching failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// A response arrived while no request was pending.
    #[error("response received with no pending request")]
    UnexpectedResponse,
}

/// Handshake failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The peer answered but refused the upgrade.
    #[error("handshake rejected: {status} {reason}")]
    Rejected {
        /// Status code in the reply.
        status: u16,
        /// Reason phrase or validation failure.
        reason: String,
    },
    /// No reply within the handshake timeout.
    #[error("handshake timed out")]
    Timeout,
    /// The reply could not be parsed.
    #[error("malformed handshake reply: {0}")]
    Codec(#[from] CodecError),
}

/// Protocol codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Bytes that cannot be parsed as a protocol unit.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// A unit exceeds the codec's size limit.
    #[error("message too large: {size} bytes exceeds {limit}")]
    TooLarge {
        /// Bytes seen so far.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// A valid protocol feature this codec does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Connecting took longer than the configured timeout.
    #[error("connect to {address} timed out")]
    ConnectTimeout {
        /// Address being dialed.
        address: String,
    },
    /// The transport can no longer open links.
    #[error("transport closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_converts_into_client_error() {
        let err: ClientError = RequestError::ConnectionLost.into();
        assert!(matches!(err, ClientError::Request(RequestError::ConnectionLost)));
    }

    #[test]
    fn invalid_transition_display_names_both_sides() {
        let err = ClientError::InvalidTransition {
            from: ConnectionState::Connected,
            transition: Transition::Connect,
        };
        let msg = err.to_string();
        assert!(msg.contains("Connect"));
        assert!(msg.contains("Connected"));
    }

    #[test]
    fn rejected_display() {
        let err = HandshakeError::Rejected {
            status: 400,
            reason: "Bad Request".into(),
        };
        assert_eq!(err.to_string(), "handshake rejected: 400 Bad Request");
    }
}
