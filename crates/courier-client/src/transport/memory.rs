//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns a transport and a listener. Every
//! [`Transport::open`] hands the listener a [`MemoryPeer`] that plays the
//! remote side: it decides when the link reports `Connected`, reads what the
//! client wrote, and pushes bytes back. The transport keeps a record of links
//! so callers can check how many were live at once. A link counts as live
//! until its driver task has finished, like a socket that is only released
//! when its owner stops.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Link, LinkEvent, Transport};
use crate::error::TransportError;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Tracker {
    links: Vec<Weak<()>>,
    opened: usize,
    max_live_at_open: usize,
    fail_next: usize,
}

impl Tracker {
    fn live(&self) -> usize {
        self.links.iter().filter(|l| l.strong_count() > 0).count()
    }
}

/// Client side of an in-process connection.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    tracker: Arc<Mutex<Tracker>>,
    auto_connect: bool,
}

/// Receives a [`MemoryPeer`] for every opened link.
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Remote end of one in-process link.
#[derive(Debug)]
pub struct MemoryPeer {
    events: mpsc::Sender<LinkEvent>,
    inbound: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
}

impl MemoryTransport {
    /// A connected transport/listener pair. Links report `Connected` as soon
    /// as they are opened.
    pub fn pair() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                tracker: Arc::new(Mutex::new(Tracker::default())),
                auto_connect: true,
            },
            MemoryListener { accept_rx },
        )
    }

    /// Leave `Connected` to [`MemoryPeer::connect`].
    #[must_use]
    pub fn with_manual_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.tracker.lock().fail_next = count;
    }

    /// Links opened so far.
    pub fn opened(&self) -> usize {
        self.tracker.lock().opened
    }

    /// Links whose driver has not finished.
    pub fn live_links(&self) -> usize {
        self.tracker.lock().live()
    }

    /// Highest number of links that were still live when another was opened.
    pub fn max_live_at_open(&self) -> usize {
        self.tracker.lock().max_live_at_open
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Link, TransportError> {
        let shutdown = CancellationToken::new();
        let alive = Arc::new(());
        {
            let mut tracker = self.tracker.lock();
            if tracker.fail_next > 0 {
                tracker.fail_next -= 1;
                return Err(TransportError::Io(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
            let live = tracker.live();
            tracker.max_live_at_open = tracker.max_live_at_open.max(live);
            tracker.opened += 1;
            tracker.links.retain(|l| l.strong_count() > 0);
            tracker.links.push(Arc::downgrade(&alive));
        }
        let driver = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                drop(alive);
            }
        });

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ev_tx, ev_rx) = mpsc::channel(CHANNEL_CAPACITY);
        if self.auto_connect {
            let _ = ev_tx.try_send(LinkEvent::Connected);
        }
        let peer = MemoryPeer {
            events: ev_tx,
            inbound: out_rx,
            shutdown: shutdown.clone(),
        };
        if self.accept_tx.send(peer).is_err() {
            shutdown.cancel();
            return Err(TransportError::Closed);
        }

        Ok(Link {
            outbound: out_tx,
            events: ev_rx,
            shutdown,
            driver,
        })
    }

    fn peer(&self) -> String {
        "memory".to_owned()
    }
}

impl MemoryListener {
    /// Wait for the next opened link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

impl MemoryPeer {
    /// Report `Connected` to the client.
    pub async fn connect(&self) -> bool {
        self.event(LinkEvent::Connected).await
    }

    /// Push bytes to the client.
    pub async fn send(&self, data: impl Into<Bytes>) -> bool {
        self.event(LinkEvent::Data(data.into())).await
    }

    /// Next chunk the client wrote. `None` once the client has closed the link
    /// and everything written before that has been read.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            chunk = self.inbound.recv() => chunk,
            () = self.shutdown.cancelled() => self.inbound.try_recv().ok(),
        }
    }

    /// Drop the connection from the remote side. The link stays live until
    /// the client shuts it down.
    pub async fn disconnect(self) {
        let _ = self.event(LinkEvent::Disconnected).await;
    }

    /// Whether the client has shut this link down.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn event(&self, event: LinkEvent) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.events.send(event).await.is_ok()
    }
}
