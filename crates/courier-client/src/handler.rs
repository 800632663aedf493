//! Connection lifecycle callbacks.

use crate::codec::{HandshakeRequest, HandshakeResponse};
use crate::error::{ClientError, CodecError, HandshakeError};

/// Why a link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect` was called.
    Requested,
    /// `reconnect` was called.
    Reconnect,
    /// The transport closed.
    TransportClosed,
    /// The handshake was refused or timed out.
    Handshake(HandshakeError),
    /// Inbound bytes could not be decoded.
    Codec(CodecError),
}

/// Callbacks invoked by the client's reader task.
///
/// Every method defaults to doing nothing. Callbacks run on the link's reader
/// task with no client lock held. They may call `submit` and `state`, but must
/// not await `disconnect`, `reconnect` or a state change, since those wait on
/// the reader task itself.
pub trait ClientHandler<R>: Send + Sync + 'static {
    /// The transport connected and the handshake is about to be sent.
    /// Called once per attempt, only for codecs with a handshake.
    fn on_connecting(&self, request: &mut HandshakeRequest) {
        let _ = request;
    }

    /// The client is `Connected`. `response` is the handshake reply, if any.
    fn on_connected(&self, response: Option<&HandshakeResponse>) {
        let _ = response;
    }

    /// A link was torn down. Pending requests have already failed.
    fn on_disconnected(&self, reason: &DisconnectReason) {
        let _ = reason;
    }

    /// A response was decoded, before it completes its request.
    fn on_received(&self, response: &R) {
        let _ = response;
    }

    /// A non-fatal error, such as a response nobody asked for.
    fn on_error(&self, error: &ClientError) {
        let _ = error;
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl<R> ClientHandler<R> for NoopHandler {}
