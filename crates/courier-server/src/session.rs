//! One connected peer: its identifier and the capability to send to it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use courier_core::Identifier;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Data payload in the frame kind it arrived in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Raw bytes of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(t) => t.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the first `n` bytes, keeping the frame kind.
    ///
    /// For text, `n` must fall on a char boundary; callers only strip ASCII
    /// identifier prefixes. Returns `None` if it does not.
    pub fn strip_front(self, n: usize) -> Option<Self> {
        match self {
            Self::Text(t) => t.get(n..).map(|rest| Self::Text(rest.to_owned())),
            Self::Binary(b) => (n <= b.len()).then(|| Self::Binary(b.slice(n..))),
        }
    }
}

/// Frame queued for a session's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Data frame.
    Data(Payload),
    /// Close the connection with this code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

/// A connected peer.
///
/// The directory shares sessions as `Arc<Session>`. `live` flips to `false`
/// exactly once, when the directory removes the session.
pub struct Session {
    id: Identifier,
    tx: mpsc::Sender<Outbound>,
    connected_at: Instant,
    live: AtomicBool,
    responsive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
}

impl Session {
    /// Create a session that writes to `tx`.
    pub fn new(id: Identifier, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            live: AtomicBool::new(true),
            responsive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> Identifier {
        self.id
    }

    /// Queue a data frame without waiting.
    ///
    /// Returns `false` if the session is gone or its queue is full; the drop
    /// is counted.
    pub fn send(&self, payload: Payload) -> bool {
        self.enqueue(Outbound::Data(payload))
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Payload::Text(text.into()))
    }

    /// Ask the writer to close the connection.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.enqueue(Outbound::Close {
            code,
            reason: reason.to_owned(),
        })
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        if !self.is_live() {
            return false;
        }
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the session is still registered.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dead(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Record activity from the peer (any frame, including Pong).
    pub fn mark_alive(&self) {
        self.responsive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Read and reset the activity flag.
    ///
    /// Returns `true` if the peer was heard from since the previous check.
    pub fn check_alive(&self) -> bool {
        self.responsive.swap(false, Ordering::Relaxed)
    }

    /// Time since the peer was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
