//! Completion token returned by `submit`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Sleep;

use crate::error::RequestError;

/// Resolves to the response matched to one request.
///
/// Dropping the future abandons the wait only: the request stays queued so
/// later responses still line up, and its response is discarded on arrival.
/// A deadline, if set, is measured from submission.
#[must_use = "a ResponseFuture does nothing unless awaited"]
pub struct ResponseFuture<R> {
    seq: u64,
    rx: oneshot::Receiver<Result<R, RequestError>>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<R> ResponseFuture<R> {
    pub(crate) fn new(
        seq: u64,
        rx: oneshot::Receiver<Result<R, RequestError>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            seq,
            rx,
            deadline: timeout.map(|t| Box::pin(tokio::time::sleep(t))),
        }
    }

    /// Submission sequence number of the request.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl<R> Unpin for ResponseFuture<R> {}

impl<R> Future for ResponseFuture<R> {
    type Output = Result<R, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Poll::Ready(result) = Pin::new(&mut self.rx).poll(cx) {
            return Poll::Ready(result.unwrap_or(Err(RequestError::Cancelled)));
        }
        if let Some(deadline) = self.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(RequestError::Timeout));
            }
        }
        Poll::Pending
    }
}

impl<R> std::fmt::Debug for ResponseFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("seq", &self.seq)
            .field("has_deadline", &self.deadline.is_some())
            .finish()
    }
}
