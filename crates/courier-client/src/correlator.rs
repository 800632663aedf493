//! In-order matching of responses to pending requests.
//!
//! The protocol answers requests strictly in the order they were sent, so
//! matching needs no request ids: every response completes the oldest pending
//! request.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CorrelationError, RequestError};

/// Sender half completed when a request resolves.
pub type Completion<R> = oneshot::Sender<Result<R, RequestError>>;

/// A request sent on the wire and awaiting its response.
#[derive(Debug)]
pub struct PendingRequest<R> {
    seq: u64,
    tx: Completion<R>,
    submitted_at: Instant,
}

impl<R> PendingRequest<R> {
    /// Submission sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Time since submission.
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// FIFO of pending requests.
#[derive(Debug)]
pub struct RequestCorrelator<R> {
    queue: VecDeque<PendingRequest<R>>,
    next_seq: u64,
}

impl<R> RequestCorrelator<R> {
    /// Empty correlator.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Append a pending request; returns its sequence number and the receiver
    /// its response will be delivered on.
    pub fn register(&mut self) -> (u64, oneshot::Receiver<Result<R, RequestError>>) {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(PendingRequest {
            seq,
            tx,
            submitted_at: Instant::now(),
        });
        (seq, rx)
    }

    /// Complete the oldest pending request with `response`.
    ///
    /// If its caller has stopped waiting, the response is discarded; the
    /// request still consumes this response. Returns the matched sequence
    /// number.
    pub fn fulfill(&mut self, response: R) -> Result<u64, CorrelationError> {
        let pending = self
            .queue
            .pop_front()
            .ok_or(CorrelationError::UnexpectedResponse)?;
        let seq = pending.seq;
        if pending.tx.send(Ok(response)).is_err() {
            debug!(seq, "response for abandoned request discarded");
        }
        Ok(seq)
    }

    /// Fail every pending request with `error` and clear the queue.
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&mut self, error: RequestError) -> usize {
        let count = self.queue.len();
        for pending in self.queue.drain(..) {
            let _ = pending.tx.send(Err(error));
        }
        count
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The oldest pending request, if any.
    pub fn oldest(&self) -> Option<&PendingRequest<R>> {
        self.queue.front()
    }
}

impl<R> Default for RequestCorrelator<R> {
    fn default() -> Self {
        Self::new()
    }
}
