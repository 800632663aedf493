//! Transport boundary.
//!
//! A [`Transport`] opens [`Link`]s. A link is one physical connection seen as
//! three signals ([`LinkEvent`]) plus a byte sender. Events for one link are
//! delivered in order, and no `Data` follows `Disconnected`. Cancelling
//! [`Link::shutdown`] closes the link; the transport then stops delivering
//! events for it. The connection itself is owned by [`Link::driver`] and is
//! released once that task finishes.

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::TransportError;

pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;

/// Signal from a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The connection is established.
    Connected,
    /// Bytes arrived.
    Data(Bytes),
    /// The connection is gone. Last event on the link.
    Disconnected,
}

/// One open connection.
#[derive(Debug)]
pub struct Link {
    /// Bytes to write, in order.
    pub outbound: mpsc::Sender<Bytes>,
    /// Signals from the connection.
    pub events: mpsc::Receiver<LinkEvent>,
    /// Cancel to close the connection.
    pub shutdown: CancellationToken,
    /// Task owning the connection. Stops promptly once `shutdown` fires.
    pub driver: JoinHandle<()>,
}

impl Link {
    /// Cancel the link and wait until the connection is released.
    pub async fn close(self) {
        self.shutdown.cancel();
        join_driver(self.driver).await;
    }
}

/// Wait for a link driver, logging if it panicked.
pub(crate) async fn join_driver(driver: JoinHandle<()>) {
    if let Err(e) = driver.await {
        if e.is_panic() {
            warn!(error = %e, "link driver panicked");
        }
    }
}

/// Opens links to a fixed peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new link.
    ///
    /// May complete before the connection is established; `Connected` is
    /// reported on the link's event channel either way.
    async fn open(&self) -> Result<Link, TransportError>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;
}
