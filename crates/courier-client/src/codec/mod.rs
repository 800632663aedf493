//! Protocol codecs.
//!
//! A [`Codec`] turns requests into bytes and bytes into responses. Decoding
//! works on an accumulating [`BytesMut`]: `Ok(None)` means more bytes are
//! needed, `Ok(Some(_))` consumed one complete unit from the front.

pub mod http;
pub mod line;

use bytes::BytesMut;

use crate::error::{CodecError, HandshakeError};

pub use self::http::{HttpCodec, HttpRequest, HttpResponse, METHODS, parse_method};
pub use ::http::{Method, StatusCode};
pub use line::LineCodec;

/// Request side of the upgrade handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target, e.g. `/`.
    pub target: String,
    /// Header fields in send order.
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// A request with no headers.
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers: Vec::new(),
        }
    }

    /// First header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replace every header named `name` with a single `value`.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }
}

/// Reply to the upgrade handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header fields in received order.
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// First header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Wire protocol spoken over a link.
///
/// Implementations are shared between the caller submitting requests and
/// the reader task decoding responses, so methods take `&self`.
pub trait Codec: Send + Sync + 'static {
    /// What callers submit.
    type Request: Send + 'static;
    /// What comes back for each request.
    type Response: Send + 'static;

    /// Append `request` to `dst`.
    fn encode(&self, request: &Self::Request, dst: &mut BytesMut) -> Result<(), CodecError>;

    /// Note that `request` is now on the wire. Called once per request, in
    /// submission order, before its response can arrive.
    fn expect_response(&self, request: &Self::Request) {
        let _ = request;
    }

    /// Take one complete response off the front of `src`.
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Self::Response>, CodecError>;

    /// Handshake to send after the link connects, if the protocol has one.
    fn handshake_request(&self) -> Option<HandshakeRequest> {
        None
    }

    /// Append the handshake request to `dst`.
    fn encode_handshake(
        &self,
        request: &HandshakeRequest,
        dst: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let _ = (request, dst);
        Err(CodecError::Unsupported("handshake".into()))
    }

    /// Take the handshake reply off the front of `src`.
    fn decode_handshake(&self, src: &mut BytesMut) -> Result<Option<HandshakeResponse>, CodecError> {
        let _ = src;
        Err(CodecError::Unsupported("handshake".into()))
    }

    /// Accept or refuse a handshake reply.
    fn validate_handshake(
        &self,
        request: &HandshakeRequest,
        response: &HandshakeResponse,
    ) -> Result<(), HandshakeError> {
        let _ = request;
        if response.status == 101 {
            Ok(())
        } else {
            Err(HandshakeError::Rejected {
                status: response.status,
                reason: response.reason.clone(),
            })
        }
    }

    /// Forget per-link decoding state. Called after every teardown.
    fn reset(&self) {}
}
