//! TCP transport over `tokio::net::TcpStream`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use courier_settings::ClientSettings;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{Link, LinkEvent, Transport};
use crate::error::TransportError;

const READ_CHUNK: usize = 8 * 1024;
const EVENT_CAPACITY: usize = 64;

/// Dials `address` for every link.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
    send_queue_capacity: usize,
}

impl TcpTransport {
    /// Transport to `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(10),
            send_queue_capacity: 256,
        }
    }

    /// Transport configured from settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(settings.address.clone())
            .with_connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .with_send_queue_capacity(settings.send_queue_capacity)
    }

    /// Fail `open` if dialing takes longer than `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Outbound chunks buffered per link.
    #[must_use]
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Address this transport dials.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Transport for TcpTransport {
    #[instrument(skip(self), fields(address = %self.address))]
    async fn open(&self) -> Result<Link, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: self.address.clone(),
            })??;
        stream.set_nodelay(true)?;
        debug!("tcp connected");

        let (out_tx, out_rx) = mpsc::channel(self.send_queue_capacity);
        let (ev_tx, ev_rx) = mpsc::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();

        // Capacity is free on a fresh channel.
        let _ = ev_tx.try_send(LinkEvent::Connected);
        let (read, write) = stream.into_split();
        let driver = tokio::spawn(drive(read, write, out_rx, ev_tx, shutdown.clone()));

        Ok(Link {
            outbound: out_tx,
            events: ev_rx,
            shutdown,
            driver,
        })
    }

    fn peer(&self) -> String {
        self.address.clone()
    }
}

/// Pump bytes both ways until either side closes or the link is cancelled.
///
/// Reads, writes and cancellation are polled together, so a write stuck on a
/// peer that stopped reading neither blocks reads nor delays shutdown. Both
/// halves are dropped before this returns.
async fn drive(
    read: OwnedReadHalf,
    mut write: OwnedWriteHalf,
    out_rx: mpsc::Receiver<Bytes>,
    ev_tx: mpsc::Sender<LinkEvent>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => {}
        () = write_out(&mut write, out_rx) => {}
        () = read_in(read, &ev_tx) => {}
    }
    let _ = write.shutdown().await;
    drop(write);
    if !shutdown.is_cancelled() {
        let _ = ev_tx.send(LinkEvent::Disconnected).await;
    }
}

async fn write_out(write: &mut OwnedWriteHalf, mut out_rx: mpsc::Receiver<Bytes>) {
    while let Some(chunk) = out_rx.recv().await {
        if let Err(e) = write.write_all(&chunk).await {
            debug!(error = %e, "tcp write failed");
            return;
        }
    }
}

async fn read_in(mut read: OwnedReadHalf, ev_tx: &mpsc::Sender<LinkEvent>) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        match read.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("tcp peer closed");
                return;
            }
            Ok(_) => {
                let data = buf.split().freeze();
                if ev_tx.send(LinkEvent::Data(data)).await.is_err() {
                    return;
                }
                buf.reserve(READ_CHUNK);
            }
            Err(e) => {
                debug!(error = %e, "tcp read failed");
                return;
            }
        }
    }
}
