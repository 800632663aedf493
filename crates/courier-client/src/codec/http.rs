//! HTTP/1.1 codec.
//!
//! Requests are written with `Host` and, when they carry a body,
//! `Content-Length`. Response heads are parsed by `httparse`; bodies are framed
//! by `Content-Length`. `1xx` interim responses are skipped, and replies to
//! `HEAD` as well as `204`/`304` carry no body. Chunked transfer coding is
//! refused. With an upgrade protocol set, the link opens with
//! `Connection: Upgrade` and expects `101 Switching Protocols` naming the same
//! protocol.

use std::borrow::Cow;
use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING, UPGRADE};
use http::uri::PathAndQuery;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;

use super::{Codec, HandshakeRequest, HandshakeResponse};
use crate::error::{CodecError, HandshakeError};

/// Longest status line plus headers accepted.
pub const MAX_HEAD: usize = 64 * 1024;
/// Largest body accepted.
pub const MAX_BODY: usize = 16 * 1024 * 1024;
/// Most header fields accepted in one response head.
pub const MAX_HEADERS: usize = 64;

/// Methods the console and helpers submit.
pub const METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
];

/// One of [`METHODS`], matched case-insensitively.
pub fn parse_method(name: &str) -> Result<Method, CodecError> {
    METHODS
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(name))
        .ok_or_else(|| CodecError::Unsupported(format!("method {name}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

/// One HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Origin-form target, always starting with `/` (or `*`).
    pub path: String,
    /// Extra header fields.
    pub headers: HeaderMap,
    /// Body bytes.
    pub body: Bytes,
}

impl HttpRequest {
    /// A request for `url`.
    ///
    /// Absolute URLs (`http://host/path`) are reduced to their path; the
    /// host always comes from the codec.
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            path: origin_form(url),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header field.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

fn origin_form(url: &str) -> String {
    let url = url.trim();
    let rest = ["http://", "https://"]
        .iter()
        .find_map(|scheme| {
            url.get(..scheme.len())
                .filter(|p| p.eq_ignore_ascii_case(scheme))
                .map(|_| &url[scheme.len()..])
        })
        .map(|after| after.find('/').map_or("/", |i| &after[i..]));
    match rest {
        Some(path) => path.to_owned(),
        None if url.is_empty() => "/".to_owned(),
        None if url.starts_with('/') || url == "*" => url.to_owned(),
        None => format!("/{url}"),
    }
}

/// One HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Reason phrase as sent.
    pub reason: String,
    /// Header fields.
    pub headers: HeaderMap,
    /// Body bytes.
    pub body: Bytes,
}

impl HttpResponse {
    /// First header named `name` if it is visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// `2xx`.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP/1.1 over a persistent link.
#[derive(Debug)]
pub struct HttpCodec {
    host: String,
    upgrade: Option<String>,
    /// One entry per request on the wire: whether it was a `HEAD`.
    in_flight: Mutex<VecDeque<bool>>,
}

impl HttpCodec {
    /// Codec sending `Host: host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            upgrade: None,
            in_flight: Mutex::new(VecDeque::new()),
        }
    }

    /// Open every link with an upgrade to `protocol`.
    #[must_use]
    pub fn with_upgrade(mut self, protocol: impl Into<String>) -> Self {
        self.upgrade = Some(protocol.into());
        self
    }

    /// Host header value.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Upgrade protocol, if any.
    pub fn upgrade(&self) -> Option<&str> {
        self.upgrade.as_deref()
    }

    fn body_len(&self, head: &Head) -> Result<usize, CodecError> {
        let head_request = self.in_flight.lock().front().copied().unwrap_or(false);
        if head_request
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            return Ok(0);
        }
        let chunked = head.headers.get_all(TRANSFER_ENCODING).iter().any(|te| {
            te.to_str()
                .is_ok_and(|te| te.to_ascii_lowercase().contains("chunked"))
        });
        if chunked {
            return Err(CodecError::Unsupported("chunked transfer coding".into()));
        }
        let Some(len) = head.headers.get(CONTENT_LENGTH) else {
            return Ok(0);
        };
        let len: usize = len
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| CodecError::Malformed(format!("content-length {len:?}")))?;
        if len > MAX_BODY {
            return Err(CodecError::TooLarge {
                size: len,
                limit: MAX_BODY,
            });
        }
        Ok(len)
    }
}

impl Codec for HttpCodec {
    type Request = HttpRequest;
    type Response = HttpResponse;

    fn encode(&self, request: &HttpRequest, dst: &mut BytesMut) -> Result<(), CodecError> {
        check_target(&request.path)?;
        write_request_line(dst, request.method.as_str(), &request.path);
        if !request.headers.contains_key(HOST) {
            write_header(dst, HOST.as_str(), &header_value(&self.host)?);
        }
        for (name, value) in &request.headers {
            if *name == CONTENT_LENGTH {
                continue;
            }
            write_header(dst, name.as_str(), value);
        }
        if !request.body.is_empty() || request.method == Method::POST || request.method == Method::PUT
        {
            let len = HeaderValue::from(request.body.len());
            write_header(dst, CONTENT_LENGTH.as_str(), &len);
        }
        dst.put_slice(b"\r\n");
        dst.put_slice(&request.body);
        Ok(())
    }

    fn expect_response(&self, request: &HttpRequest) {
        self.in_flight.lock().push_back(request.method == Method::HEAD);
    }

    fn decode(&self, src: &mut BytesMut) -> Result<Option<HttpResponse>, CodecError> {
        loop {
            let Some((head, head_len)) = parse_head(src)? else {
                return Ok(None);
            };
            if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
                let _ = src.split_to(head_len);
                continue;
            }
            let body_len = self.body_len(&head)?;
            if src.len() < head_len + body_len {
                return Ok(None);
            }
            let _ = src.split_to(head_len);
            let body = src.split_to(body_len).freeze();
            let _ = self.in_flight.lock().pop_front();
            return Ok(Some(HttpResponse {
                status: head.status,
                reason: head.reason,
                headers: head.headers,
                body,
            }));
        }
    }

    fn handshake_request(&self) -> Option<HandshakeRequest> {
        let protocol = self.upgrade.as_ref()?;
        let mut request = HandshakeRequest::new("GET", "/");
        request.set_header("Host", self.host.clone());
        request.set_header("Connection", "Upgrade");
        request.set_header("Upgrade", protocol.clone());
        Some(request)
    }

    fn encode_handshake(
        &self,
        request: &HandshakeRequest,
        dst: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| CodecError::Malformed(format!("method {:?}: {e}", request.method)))?;
        check_target(&request.target)?;
        write_request_line(dst, method.as_str(), &request.target);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CodecError::Malformed(format!("header name {name:?}: {e}")))?;
            write_header(dst, name.as_str(), &header_value(value)?);
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }

    fn decode_handshake(&self, src: &mut BytesMut) -> Result<Option<HandshakeResponse>, CodecError> {
        let Some((head, head_len)) = parse_head(src)? else {
            return Ok(None);
        };
        let _ = src.split_to(head_len);
        let headers = head
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Ok(Some(HandshakeResponse {
            status: head.status.as_u16(),
            reason: head.reason,
            headers,
        }))
    }

    fn validate_handshake(
        &self,
        request: &HandshakeRequest,
        response: &HandshakeResponse,
    ) -> Result<(), HandshakeError> {
        if response.status != StatusCode::SWITCHING_PROTOCOLS.as_u16() {
            return Err(HandshakeError::Rejected {
                status: response.status,
                reason: response.reason.clone(),
            });
        }
        let wanted = request.header(UPGRADE.as_str()).unwrap_or_default();
        match response.header(UPGRADE.as_str()) {
            Some(got) if got.trim().eq_ignore_ascii_case(wanted) => Ok(()),
            got => Err(HandshakeError::Rejected {
                status: response.status,
                reason: format!("upgrade mismatch: wanted {wanted:?}, got {got:?}"),
            }),
        }
    }

    fn reset(&self) {
        self.in_flight.lock().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Head parsing and writing
// ─────────────────────────────────────────────────────────────────────────────

struct Head {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
}

/// Parse a status line and headers once the blank line has arrived.
/// Returns the head and its length including the terminator.
fn parse_head(src: &[u8]) -> Result<Option<(Head, usize)>, CodecError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut slots);
    let head_len = match response.parse(src) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) if src.len() > MAX_HEAD => {
            return Err(CodecError::TooLarge {
                size: src.len(),
                limit: MAX_HEAD,
            });
        }
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(CodecError::Malformed(format!("response head: {e}"))),
    };
    if head_len > MAX_HEAD {
        return Err(CodecError::TooLarge {
            size: head_len,
            limit: MAX_HEAD,
        });
    }

    let code = response
        .code
        .ok_or_else(|| CodecError::Malformed("response head without status".into()))?;
    let status = StatusCode::from_u16(code)
        .map_err(|e| CodecError::Malformed(format!("status {code}: {e}")))?;
    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for field in response.headers.iter() {
        let name = HeaderName::from_bytes(field.name.as_bytes())
            .map_err(|e| CodecError::Malformed(format!("header name {:?}: {e}", field.name)))?;
        let value = HeaderValue::from_bytes(field.value)
            .map_err(|e| CodecError::Malformed(format!("header {name}: {e}")))?;
        headers.append(name, value);
    }
    Ok(Some((
        Head {
            status,
            reason: response.reason.unwrap_or_default().to_owned(),
            headers,
        },
        head_len,
    )))
}

fn check_target(target: &str) -> Result<(), CodecError> {
    if target == "*" {
        return Ok(());
    }
    match target.parse::<PathAndQuery>() {
        Ok(_) if target.starts_with('/') => Ok(()),
        _ => Err(CodecError::Malformed(format!("request target {target:?}"))),
    }
}

fn header_value(value: &str) -> Result<HeaderValue, CodecError> {
    HeaderValue::from_str(value).map_err(|e| CodecError::Malformed(format!("header value: {e}")))
}

fn write_request_line(dst: &mut BytesMut, method: &str, target: &str) {
    dst.put_slice(method.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");
}

fn write_header(dst: &mut BytesMut, name: &str, value: &HeaderValue) {
    dst.put_slice(name.as_bytes());
    dst.put_slice(b": ");
    dst.put_slice(value.as_bytes());
    dst.put_slice(b"\r\n");
}
