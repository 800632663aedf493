//! Server-originated notices addressed to a peer about its own session.
//!
//! Notices are JSON text frames shaped like
//! `{"type": "...", "timestamp": "...", "data": {...}}`. They are never routed
//! between peers; the server writes them straight onto the session they
//! concern.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ids::Identifier;

/// Kind of notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeType {
    /// Sent once after upgrade; carries the peer's own identifier.
    #[serde(rename = "connection.established")]
    ConnectionEstablished,
    /// A directed message from this peer could not be delivered.
    #[serde(rename = "delivery.failed")]
    DeliveryFailed,
}

impl NoticeType {
    /// Wire name of the notice type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection.established",
            Self::DeliveryFailed => "delivery.failed",
        }
    }
}

/// A notice envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    /// Notice kind.
    #[serde(rename = "type")]
    pub notice_type: NoticeType,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Notice-specific payload.
    pub data: Value,
}

impl Notice {
    /// Tell a freshly connected peer which identifier it was assigned.
    pub fn connection_established(session_id: Identifier) -> Self {
        Self::now(
            NoticeType::ConnectionEstablished,
            json!({ "sessionId": session_id }),
        )
    }

    /// Tell a sender that its directed message to `target` was dropped.
    pub fn delivery_failed(target: Identifier, reason: &str) -> Self {
        Self::now(
            NoticeType::DeliveryFailed,
            json!({ "target": target, "reason": reason }),
        )
    }

    fn now(notice_type: NoticeType, data: Value) -> Self {
        Self {
            notice_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> String {
        // Only strings and JSON values inside; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
