//! Peer identifiers.
//!
//! Every connected peer is named by an [`Identifier`]: a 128-bit UUID whose
//! canonical textual form is exactly [`IDENTIFIER_LEN`] characters. That fixed
//! width is what lets a directed payload carry its target as a plain prefix.
//!
//! New identifiers are UUID v7 (time-ordered) generated via
//! [`uuid::Uuid::now_v7`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::constants::IDENTIFIER_LEN;

/// Why a string could not be read as an [`Identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Input is not exactly [`IDENTIFIER_LEN`] bytes long.
    #[error("identifier must be {IDENTIFIER_LEN} characters, got {0}")]
    Length(usize),
    /// Input has the right length but is not a hyphenated UUID.
    #[error("identifier is not a hyphenated UUID: {0}")]
    Format(String),
}

/// Unique identifier for one live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Uuid);

impl Identifier {
    /// Create a new random identifier (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse the canonical 36-character hyphenated form.
    ///
    /// The simple (32 hex digits), braced, and URN forms that [`Uuid`] would
    /// otherwise accept are rejected, so text and identifier are one-to-one.
    pub fn parse(text: &str) -> Result<Self, IdentifierError> {
        Self::parse_bytes(text.as_bytes())
    }

    /// Parse the canonical form from raw bytes.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, IdentifierError> {
        if bytes.len() != IDENTIFIER_LEN {
            return Err(IdentifierError::Length(bytes.len()));
        }
        Uuid::try_parse_ascii(bytes)
            .map(Self)
            .map_err(|e| IdentifierError::Format(e.to_string()))
    }

    /// Split a payload into a leading identifier and the remainder.
    ///
    /// Returns `None` when the payload is shorter than the prefix or the
    /// prefix is not a canonical UUID.
    pub fn split_prefix(payload: &[u8]) -> Option<(Self, &[u8])> {
        if payload.len() < IDENTIFIER_LEN {
            return None;
        }
        let (head, rest) = payload.split_at(IDENTIFIER_LEN);
        Self::parse_bytes(head).ok().map(|id| (id, rest))
    }

    /// Build a directed payload: this identifier followed by `body`.
    #[must_use]
    pub fn address(&self, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(IDENTIFIER_LEN + body.len());
        out.extend_from_slice(self.to_string().as_bytes());
        out.extend_from_slice(body);
        out
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
