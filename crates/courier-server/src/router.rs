//! Directed message routing.
//!
//! A payload whose first [`IDENTIFIER_LEN`] bytes spell a canonical UUID is a
//! directed message: the prefix is stripped and the remainder is queued on the
//! named session in the same frame kind. Anything else is left to the caller.
//! The exact payload [`CLOSE_COMMAND`] closes the sender's own session and is
//! checked before any addressing.

use std::sync::Arc;

use courier_core::constants::{CLOSE_COMMAND, CLOSE_NORMAL, IDENTIFIER_LEN};
use courier_core::{Identifier, Notice};
use metrics::counter;
use tracing::{debug, warn};

use crate::directory::SessionDirectory;
use crate::errors::RouteError;
use crate::metrics::{MESSAGES_ROUTED_TOTAL, ROUTE_FAILURES_TOTAL};
use crate::session::{Payload, Session};

/// What the router did with one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the target session.
    Forwarded(Identifier),
    /// No addressing prefix; handed back for local handling.
    NotDirected(Payload),
    /// The close command; the source session has been asked to close.
    Closed,
    /// Directed but undeliverable; the source has been told.
    Failed(RouteError),
}

/// Routes payloads between sessions of one directory.
pub struct MessageRouter {
    directory: Arc<SessionDirectory>,
    notify_sender: bool,
}

impl MessageRouter {
    /// Create a router over `directory`.
    ///
    /// With `notify_sender` set, failures also send a `delivery.failed`
    /// notice to the source session.
    pub fn new(directory: Arc<SessionDirectory>, notify_sender: bool) -> Self {
        Self {
            directory,
            notify_sender,
        }
    }

    /// The directory this router resolves targets against.
    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    /// Route one payload received on `source`.
    ///
    /// Never blocks on the target and never fails the source session.
    pub fn route(&self, source: &Session, payload: Payload) -> RouteOutcome {
        if payload.as_bytes() == CLOSE_COMMAND {
            debug!(session_id = %source.id(), "close command received");
            let _ = source.close(CLOSE_NORMAL, "");
            return RouteOutcome::Closed;
        }

        let Some((target, _)) = Identifier::split_prefix(payload.as_bytes()) else {
            return RouteOutcome::NotDirected(payload);
        };

        match self.forward(source, target, payload) {
            Ok(()) => {
                counter!(MESSAGES_ROUTED_TOTAL).increment(1);
                debug!(session_id = %source.id(), %target, "message forwarded");
                RouteOutcome::Forwarded(target)
            }
            Err(err) => {
                self.report_failure(source, &err);
                RouteOutcome::Failed(err)
            }
        }
    }

    fn forward(
        &self,
        source: &Session,
        target: Identifier,
        payload: Payload,
    ) -> Result<(), RouteError> {
        if target == source.id() {
            return Err(RouteError::SelfAddressed(target));
        }
        let session = self
            .directory
            .find(&target)
            .map_err(|_| RouteError::NotFound(target))?;
        // The prefix is ASCII, so this cannot split a character.
        let body = payload
            .strip_front(IDENTIFIER_LEN)
            .ok_or(RouteError::TargetUnavailable(target))?;
        if session.send(body) {
            Ok(())
        } else {
            Err(RouteError::TargetUnavailable(target))
        }
    }

    fn report_failure(&self, source: &Session, err: &RouteError) {
        counter!(ROUTE_FAILURES_TOTAL, "reason" => err.reason()).increment(1);
        warn!(
            session_id = %source.id(),
            target = %err.target(),
            reason = err.reason(),
            "delivery failed"
        );
        if self.notify_sender {
            let notice = Notice::delivery_failed(err.target(), err.reason());
            let _ = source.send_text(notice.to_json());
        }
    }
}
