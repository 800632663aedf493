//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use courier_core::constants::CLOSE_GOING_AWAY;
use courier_core::{Identifier, Notice};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
    HEARTBEAT_TIMEOUTS_TOTAL, MESSAGES_LOCAL_TOTAL,
};
use crate::router::{MessageRouter, RouteOutcome};
use crate::session::{Outbound, Payload, Session};

/// How long the writer gets to flush a final close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Everything a session task needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Router over the server's directory.
    pub router: Arc<MessageRouter>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Server-wide shutdown token.
    pub shutdown: CancellationToken,
}

/// Run one WebSocket session.
///
/// 1. Registers a fresh [`Session`] in the directory
/// 2. Sends the peer a `connection.established` notice with its identifier
/// 3. Routes every inbound data frame through the [`MessageRouter`]
/// 4. Pings the peer and drops it if it stays silent past the timeout
/// 5. Unregisters the session before returning
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_ws_session(ws: WebSocket, session_id: Identifier, ctx: SessionContext) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Outbound>(ctx.config.send_queue_capacity);
    let session = Arc::new(Session::new(session_id, send_tx));
    let directory = ctx.router.directory().clone();

    if let Err(e) = directory.add(session.clone()) {
        error!(error = %e, "could not register session");
        let _ = ws_tx.send(close_message(CLOSE_GOING_AWAY, "identifier collision")).await;
        return;
    }

    let started = Instant::now();
    info!("peer connected");
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let notice = Notice::connection_established(session_id);
    let _ = ws_tx.send(Message::Text(notice.to_json().into())).await;

    let cancel = ctx.shutdown.child_token();

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        ctx.config.heartbeat_interval,
        ctx.shutdown.clone(),
        cancel.clone(),
    ));

    let heartbeat = {
        let session = session.clone();
        let cancel = cancel.clone();
        let interval = ctx.config.heartbeat_interval;
        let timeout = ctx.config.heartbeat_timeout;
        tokio::spawn(async move {
            if run_heartbeat(session, interval, timeout, cancel.clone()).await
                == HeartbeatResult::TimedOut
            {
                warn!(?timeout, "peer unresponsive, disconnecting");
                counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                cancel.cancel();
            }
        })
    };

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let payload = match frame {
            Some(Ok(Message::Text(text))) => Payload::Text(text.as_str().to_owned()),
            Some(Ok(Message::Binary(data))) => Payload::Binary(data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                session.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(code = frame.as_ref().map(|f| f.code), "peer sent close frame");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        session.mark_alive();

        match ctx.router.route(&session, payload) {
            RouteOutcome::NotDirected(payload) => {
                counter!(MESSAGES_LOCAL_TOTAL).increment(1);
                debug!(len = payload.len(), "payload has no addressing prefix, handled locally");
            }
            RouteOutcome::Forwarded(_) | RouteOutcome::Failed(_) | RouteOutcome::Closed => {}
        }
    }

    // Unregister first so no router can queue onto a session being torn down.
    let _ = directory.remove(&session_id);
    cancel.cancel();
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    heartbeat.abort();

    info!(dropped = session.drop_count(), "peer disconnected");
    counter!(DISCONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Drain the session queue onto the socket and send periodic Pings.
///
/// Exits after writing a close frame, when the queue closes, on write
/// failure, or when either token fires. Server shutdown sends
/// `1001 Going Away` first.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Outbound>,
    ping_every: Duration,
    shutdown: CancellationToken,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(ping_every);
    // Skip the immediate first tick.
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                let _ = ws_tx.send(close_message(CLOSE_GOING_AWAY, "server shutting down")).await;
                break;
            }
            () = cancel.cancelled() => break,
            msg = send_rx.recv() => {
                let Some(msg) = msg else { break };
                let (message, last) = match msg {
                    Outbound::Data(Payload::Text(text)) => (Message::Text(text.into()), false),
                    Outbound::Data(Payload::Binary(data)) => (Message::Binary(data), false),
                    Outbound::Close { code, reason } => (close_message(code, &reason), true),
                };
                if ws_tx.send(message).await.is_err() || last {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(bytes::Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    // Wake the reader so the session unwinds.
    cancel.cancel();
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }))
}
