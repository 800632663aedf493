//! # courier-client
//!
//! Request/response client over one persistent connection.
//!
//! - **State machine**: [`ConnectionState`] and the pure transition table in
//!   [`state`], published on a `watch` channel
//! - **Correlation**: [`RequestCorrelator`] matches responses to requests in
//!   submission order; [`ResponseFuture`] is the caller's completion token
//! - **Transports**: [`transport::TcpTransport`] and the in-process
//!   [`transport::MemoryTransport`]
//! - **Codecs**: [`codec::HttpCodec`] (HTTP/1.1 with optional upgrade
//!   handshake) and [`codec::LineCodec`]
//! - **Client**: [`Client`] ties them together and calls a [`ClientHandler`]
//!   on lifecycle events

#![deny(unsafe_code)]

pub mod client;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod handler;
pub mod response;
pub mod state;
pub mod transport;

pub use client::Client;
pub use codec::{Codec, HandshakeRequest, HandshakeResponse};
pub use config::ClientConfig;
pub use correlator::RequestCorrelator;
pub use error::{
    ClientError, CodecError, CorrelationError, HandshakeError, RequestError, TransportError,
};
pub use handler::{ClientHandler, DisconnectReason, NoopHandler};
pub use response::ResponseFuture;
pub use state::{ConnectionState, ConnectionStateMachine, Transition};
pub use transport::{Link, LinkEvent, Transport};
