//! The request/response client.
//!
//! A [`Client`] owns at most one live [`Link`](crate::transport::Link) at a
//! time. A reader task per link drives the state machine from link events,
//! runs the handshake, decodes responses and hands them to the correlator.
//! Callers submit requests synchronously and await the returned
//! [`ResponseFuture`].
//!
//! Teardown cancels the link at once; `disconnect`, `reconnect` and `connect`
//! then wait for the link's driver to release the connection, so a new link
//! is never opened while an old connection is still held.
//!
//! Locking: the inner state sits behind a `parking_lot::Mutex` that is never
//! held across an `.await` or while a [`ClientHandler`] callback runs.
//! `connect`, `disconnect` and `reconnect` are serialized by a separate async
//! lock so only one of them drives the link at a time.

use std::future::pending;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::{
    Codec, HandshakeRequest, HandshakeResponse, HttpCodec, HttpRequest, HttpResponse, Method,
};
use crate::config::ClientConfig;
use crate::correlator::RequestCorrelator;
use crate::error::{ClientError, HandshakeError, RequestError, TransportError};
use crate::handler::{ClientHandler, DisconnectReason};
use crate::response::ResponseFuture;
use crate::state::{ConnectionState, ConnectionStateMachine, Transition};
use crate::transport::{LinkEvent, Transport, join_driver};

/// Request/response client over one persistent link.
///
/// Cheap to clone; clones share the link and the pending queue. The link is
/// closed when the last clone is dropped.
pub struct Client<T: Transport, C: Codec> {
    shared: Arc<Shared<T, C>>,
}

impl<T: Transport, C: Codec> Clone for Client<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport, C: Codec> std::fmt::Debug for Client<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.shared.transport.peer())
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

struct Shared<T: Transport, C: Codec> {
    transport: T,
    codec: C,
    handler: Arc<dyn ClientHandler<C::Response>>,
    config: ClientConfig,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner<C::Response>>,
    lifecycle: tokio::sync::Mutex<()>,
}

struct Inner<R> {
    machine: ConnectionStateMachine,
    correlator: RequestCorrelator<R>,
    link: Option<ActiveLink>,
    generation: u64,
    reader: Option<JoinHandle<()>>,
    /// Drivers of torn-down links that nobody has waited for yet.
    closing: Vec<JoinHandle<()>>,
    last_disconnect: Option<DisconnectReason>,
}

struct ActiveLink {
    outbound: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
    driver: JoinHandle<()>,
    generation: u64,
}

impl<R> Inner<R> {
    fn is_current(&self, generation: u64) -> bool {
        self.link.as_ref().is_some_and(|l| l.generation == generation)
    }
}

impl<T: Transport, C: Codec> Client<T, C> {
    /// Create a disconnected client.
    pub fn new(
        transport: T,
        codec: C,
        handler: impl ClientHandler<C::Response>,
        config: ClientConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                codec,
                handler: Arc::new(handler),
                config,
                state_tx,
                inner: Mutex::new(Inner {
                    machine: ConnectionStateMachine::new(),
                    correlator: RequestCorrelator::new(),
                    link: None,
                    generation: 0,
                    reader: None,
                    closing: Vec::new(),
                    last_disconnect: None,
                }),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Open a link. Returns once the transport is open; the client reaches
    /// `Connected` after the transport connects and the handshake succeeds.
    ///
    /// Fails with [`ClientError::InvalidTransition`] unless `Disconnected`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _guard = self.shared.lifecycle.lock().await;
        {
            let mut inner = self.shared.inner.lock();
            let _ = self.shared.apply(&mut inner, Transition::Connect)?;
        }
        self.shared.join_closed().await;
        self.shared.open_link().await
    }

    /// [`connect`](Self::connect), then wait until the client is either
    /// `Connected` or back to `Disconnected`.
    pub async fn connect_and_wait(&self) -> Result<(), ClientError> {
        self.connect().await?;
        match self
            .wait_for_state(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
            .await
        {
            ConnectionState::Connected => Ok(()),
            _ => Err(self.last_failure()),
        }
    }

    /// Tear the link down and wait until its connection is released and its
    /// reader task has finished.
    ///
    /// Pending requests fail with [`RequestError::ConnectionLost`]. Must not
    /// be awaited from a [`ClientHandler`] callback.
    pub async fn disconnect(&self) {
        let _guard = self.shared.lifecycle.lock().await;
        let reader = self.shared.inner.lock().reader.take();
        let _ = self.shared.teardown_current(DisconnectReason::Requested);
        {
            let mut inner = self.shared.inner.lock();
            let _ = self.shared.apply(&mut inner, Transition::Disconnect);
        }
        join_reader(reader).await;
        self.shared.join_closed().await;
    }

    /// Close the current link, if any, and open a new one.
    ///
    /// The old connection is released and its reader joined before the new
    /// link is opened, so two connections are never held at once. Must not be awaited
    /// from a [`ClientHandler`] callback.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let _guard = self.shared.lifecycle.lock().await;
        let reader = {
            let mut inner = self.shared.inner.lock();
            let _ = self.shared.apply(&mut inner, Transition::Reconnect)?;
            inner.reader.take()
        };
        let _ = self.shared.teardown_current(DisconnectReason::Reconnect);
        join_reader(reader).await;
        self.shared.join_closed().await;
        {
            let mut inner = self.shared.inner.lock();
            let _ = self.shared.apply(&mut inner, Transition::ReconnectReady)?;
        }
        self.shared.open_link().await
    }

    /// Submit a request with the configured default timeout.
    ///
    /// Requires `Connected`. The request is encoded, queued for matching and
    /// handed to the link under one lock, so queue order is wire order.
    pub fn submit(&self, request: C::Request) -> Result<ResponseFuture<C::Response>, ClientError> {
        self.submit_with_timeout(request, self.shared.config.request_timeout)
    }

    /// Submit a request with an explicit deadline (`None` waits until the
    /// link drops).
    pub fn submit_with_timeout(
        &self,
        request: C::Request,
        timeout: Option<Duration>,
    ) -> Result<ResponseFuture<C::Response>, ClientError> {
        let mut inner = self.shared.inner.lock();
        if inner.machine.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let outbound = inner
            .link
            .as_ref()
            .map(|l| l.outbound.clone())
            .ok_or(ClientError::NotConnected)?;
        let permit = outbound.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => ClientError::SendQueueFull,
            TrySendError::Closed(()) => ClientError::NotConnected,
        })?;

        let mut buf = BytesMut::new();
        self.shared.codec.encode(&request, &mut buf)?;
        self.shared.codec.expect_response(&request);
        let (seq, rx) = inner.correlator.register();
        permit.send(buf.freeze());
        trace!(seq, "request submitted");
        Ok(ResponseFuture::new(seq, rx, timeout))
    }

    /// Submit and await the response.
    pub async fn request(&self, request: C::Request) -> Result<C::Response, ClientError> {
        Ok(self.submit(request)?.await?)
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the state satisfies `accept`, returning that state.
    pub async fn wait_for_state(
        &self,
        mut accept: impl FnMut(ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut rx = self.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here.
        rx.wait_for(|s| accept(*s))
            .await
            .map_or(ConnectionState::Disconnected, |s| *s)
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.inner.lock().correlator.len()
    }

    /// Why the most recent link went away.
    pub fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.shared.inner.lock().last_disconnect.clone()
    }

    /// The transport links are opened on.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// The codec requests are encoded with.
    pub fn codec(&self) -> &C {
        &self.shared.codec
    }

    /// Configured timeouts.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn last_failure(&self) -> ClientError {
        match self.last_disconnect() {
            Some(DisconnectReason::Handshake(e)) => ClientError::Handshake(e),
            Some(DisconnectReason::Codec(e)) => ClientError::Codec(e),
            _ => ClientError::Transport(TransportError::Closed),
        }
    }
}

async fn join_reader(reader: Option<JoinHandle<()>>) {
    let Some(handle) = reader else { return };
    if let Err(e) = handle.await {
        if e.is_panic() {
            warn!(error = %e, "link reader panicked");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link driving
// ─────────────────────────────────────────────────────────────────────────────

impl<T: Transport, C: Codec> Shared<T, C> {
    fn apply(
        &self,
        inner: &mut Inner<C::Response>,
        transition: Transition,
    ) -> Result<ConnectionState, ClientError> {
        let from = inner.machine.state();
        let to = inner.machine.apply(transition)?;
        if from != to {
            debug!(from = %from, to = %to, ?transition, "state changed");
        }
        let _ = self.state_tx.send_if_modified(|s| {
            let changed = *s != to;
            *s = to;
            changed
        });
        Ok(to)
    }

    async fn open_link(self: &Arc<Self>) -> Result<(), ClientError> {
        let link = match self.transport.open().await {
            Ok(link) => link,
            Err(e) => {
                warn!(peer = %self.transport.peer(), error = %e, "transport open failed");
                let mut inner = self.inner.lock();
                let _ = self.apply(&mut inner, Transition::Disconnect);
                return Err(e.into());
            }
        };

        let mut inner = self.inner.lock();
        inner.generation += 1;
        let generation = inner.generation;
        inner.link = Some(ActiveLink {
            outbound: link.outbound,
            shutdown: link.shutdown.clone(),
            driver: link.driver,
            generation,
        });
        inner.reader = Some(tokio::spawn(run_link(
            Arc::downgrade(self),
            generation,
            link.events,
            link.shutdown,
        )));
        debug!(peer = %self.transport.peer(), generation, "link opened");
        Ok(())
    }

    /// Wait for every torn-down link to release its connection.
    async fn join_closed(&self) {
        let closing = std::mem::take(&mut self.inner.lock().closing);
        for driver in closing {
            join_driver(driver).await;
        }
    }

    /// Tear down whatever link is current.
    fn teardown_current(&self, reason: DisconnectReason) -> bool {
        let generation = self.inner.lock().link.as_ref().map(|l| l.generation);
        generation.is_some_and(|g| self.teardown(g, reason))
    }

    /// Tear down link `generation` if it is still current. Returns whether
    /// anything was torn down.
    fn teardown(&self, generation: u64, reason: DisconnectReason) -> bool {
        let failed = {
            let mut inner = self.inner.lock();
            let Some(link) = inner.link.take_if(|l| l.generation == generation) else {
                return false;
            };
            link.shutdown.cancel();
            inner.closing.retain(|d| !d.is_finished());
            inner.closing.push(link.driver);
            let failed = inner.correlator.fail_all(RequestError::ConnectionLost);
            if inner.machine.state() != ConnectionState::Reconnecting {
                let _ = self.apply(&mut inner, Transition::Disconnect);
            }
            inner.last_disconnect = Some(reason.clone());
            self.codec.reset();
            failed
        };

        match &reason {
            DisconnectReason::Requested | DisconnectReason::Reconnect => {
                info!(generation, failed, ?reason, "link closed");
            }
            DisconnectReason::TransportClosed => {
                info!(generation, failed, "link closed by peer");
            }
            DisconnectReason::Handshake(e) => warn!(generation, error = %e, "handshake failed"),
            DisconnectReason::Codec(e) => warn!(generation, failed, error = %e, "undecodable data, link closed"),
        }
        self.handler.on_disconnected(&reason);
        true
    }

    fn send(&self, generation: u64, bytes: Bytes) -> Result<(), DisconnectReason> {
        let inner = self.inner.lock();
        let Some(link) = inner.link.as_ref().filter(|l| l.generation == generation) else {
            return Ok(());
        };
        link.outbound
            .try_send(bytes)
            .map_err(|_| DisconnectReason::TransportClosed)
    }

    fn on_transport_connected(
        &self,
        generation: u64,
        handshake: &mut Option<HandshakeRequest>,
        deadline: &mut Option<Pin<Box<Sleep>>>,
    ) -> Result<(), DisconnectReason> {
        {
            let mut inner = self.inner.lock();
            if !inner.is_current(generation) {
                return Ok(());
            }
            if let Err(e) = self.apply(&mut inner, Transition::TransportConnected) {
                debug!(error = %e, "connected signal ignored");
                return Ok(());
            }
        }

        let Some(mut request) = self.codec.handshake_request() else {
            self.accept(generation, None);
            return Ok(());
        };
        self.handler.on_connecting(&mut request);
        let mut buf = BytesMut::new();
        self.codec
            .encode_handshake(&request, &mut buf)
            .map_err(|e| DisconnectReason::Handshake(HandshakeError::Codec(e)))?;
        self.send(generation, buf.freeze())?;
        debug!(generation, "handshake sent");
        *deadline = Some(Box::pin(tokio::time::sleep(self.config.handshake_timeout)));
        *handshake = Some(request);
        Ok(())
    }

    fn accept(&self, generation: u64, response: Option<&HandshakeResponse>) {
        {
            let mut inner = self.inner.lock();
            if !inner.is_current(generation)
                || self.apply(&mut inner, Transition::HandshakeAccepted).is_err()
            {
                return;
            }
        }
        info!(peer = %self.transport.peer(), generation, "connected");
        self.handler.on_connected(response);
    }

    fn on_data(
        &self,
        generation: u64,
        buf: &mut BytesMut,
        handshake: &mut Option<HandshakeRequest>,
        deadline: &mut Option<Pin<Box<Sleep>>>,
    ) -> Result<(), DisconnectReason> {
        if let Some(request) = handshake.as_ref() {
            let reply = match self.codec.decode_handshake(buf) {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(()),
                Err(e) => return Err(DisconnectReason::Handshake(HandshakeError::Codec(e))),
            };
            self.codec
                .validate_handshake(request, &reply)
                .map_err(DisconnectReason::Handshake)?;
            *handshake = None;
            *deadline = None;
            self.accept(generation, Some(&reply));
        }

        if self.inner.lock().machine.state() != ConnectionState::Connected {
            return Ok(());
        }
        loop {
            let response = match self.codec.decode(buf) {
                Ok(Some(response)) => response,
                Ok(None) => return Ok(()),
                Err(e) => return Err(DisconnectReason::Codec(e)),
            };
            if !self.inner.lock().is_current(generation) {
                return Ok(());
            }
            self.handler.on_received(&response);
            let matched = {
                let mut inner = self.inner.lock();
                if !inner.is_current(generation) {
                    return Ok(());
                }
                inner.correlator.fulfill(response)
            };
            match matched {
                Ok(seq) => trace!(seq, "response matched"),
                Err(e) => {
                    warn!(error = %e, "response discarded");
                    self.handler.on_error(&e.into());
                }
            }
        }
    }
}

impl<T: Transport, C: Codec> Drop for Shared<T, C> {
    fn drop(&mut self) {
        if let Some(link) = self.inner.get_mut().link.take() {
            link.shutdown.cancel();
        }
    }
}

async fn sleep_until(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

/// Reader task for one link.
#[instrument(skip_all, fields(generation = generation))]
async fn run_link<T: Transport, C: Codec>(
    weak: Weak<Shared<T, C>>,
    generation: u64,
    mut events: mpsc::Receiver<LinkEvent>,
    shutdown: CancellationToken,
) {
    let mut buf = BytesMut::new();
    let mut handshake = None;
    let mut deadline = None;

    let (shared, reason) = loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            () = sleep_until(&mut deadline) => Err(DisconnectReason::Handshake(HandshakeError::Timeout)),
            event = events.recv() => Ok(event),
        };
        let Some(shared) = weak.upgrade() else { return };
        let step = event.and_then(|event| match event {
            Some(LinkEvent::Connected) => {
                shared.on_transport_connected(generation, &mut handshake, &mut deadline)
            }
            Some(LinkEvent::Data(data)) => {
                buf.extend_from_slice(&data);
                shared.on_data(generation, &mut buf, &mut handshake, &mut deadline)
            }
            Some(LinkEvent::Disconnected) | None => Err(DisconnectReason::TransportClosed),
        });
        if let Err(reason) = step {
            break (shared, reason);
        }
    };
    let _ = shared.teardown(generation, reason);
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP helpers
// ─────────────────────────────────────────────────────────────────────────────

impl<T: Transport> Client<T, HttpCodec> {
    /// Submit `method url` with an optional body.
    pub fn send_request(
        &self,
        method: Method,
        url: &str,
        body: Option<Bytes>,
    ) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        let mut request = HttpRequest::new(method, url);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.submit(request)
    }

    /// `GET url`
    pub fn get(&self, url: &str) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        self.send_request(Method::GET, url, None)
    }

    /// `HEAD url`
    pub fn head(&self, url: &str) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        self.send_request(Method::HEAD, url, None)
    }

    /// `POST url` with `body`.
    pub fn post(
        &self,
        url: &str,
        body: impl Into<Bytes>,
    ) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        self.send_request(Method::POST, url, Some(body.into()))
    }

    /// `PUT url` with `body`.
    pub fn put(
        &self,
        url: &str,
        body: impl Into<Bytes>,
    ) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        self.send_request(Method::PUT, url, Some(body.into()))
    }

    /// `DELETE url`
    pub fn delete(&self, url: &str) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        self.send_request(Method::DELETE, url, None)
    }

    /// `OPTIONS url`
    pub fn options(&self, url: &str) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        self.send_request(Method::OPTIONS, url, None)
    }

    /// `TRACE url`
    pub fn trace(&self, url: &str) -> Result<ResponseFuture<HttpResponse>, ClientError> {
        self.send_request(Method::TRACE, url, None)
    }
}
