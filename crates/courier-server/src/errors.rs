//! Directory and routing errors.
//!
//! None of these terminate a session. Directory errors surface to the caller
//! of the directory; route errors are reported back to the sending session.

use courier_core::Identifier;
use thiserror::Error;

/// Session directory failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// A session with this identifier is already registered.
    #[error("session {0} is already registered")]
    DuplicateIdentifier(Identifier),
    /// No live session has this identifier.
    #[error("session {0} not found")]
    NotFound(Identifier),
}

/// Why a directed message could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The target is not in the directory.
    #[error("target {0} not found")]
    NotFound(Identifier),
    /// The source addressed itself.
    #[error("session {0} addressed itself")]
    SelfAddressed(Identifier),
    /// The target exists but its send queue is full or closed.
    #[error("target {0} cannot accept messages")]
    TargetUnavailable(Identifier),
}

impl RouteError {
    /// Identifier the failed message was addressed to.
    pub fn target(&self) -> Identifier {
        match self {
            Self::NotFound(id) | Self::SelfAddressed(id) | Self::TargetUnavailable(id) => *id,
        }
    }

    /// Short machine-readable reason, used in notices and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::SelfAddressed(_) => "self_addressed",
            Self::TargetUnavailable(_) => "target_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_snake_case() {
        let id = Identifier::new();
        for err in [
            RouteError::NotFound(id),
            RouteError::SelfAddressed(id),
            RouteError::TargetUnavailable(id),
        ] {
            assert_eq!(err.target(), id);
            assert!(err.reason().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn display_names_identifier() {
        let id = Identifier::new();
        let msg = DirectoryError::DuplicateIdentifier(id).to_string();
        assert!(msg.contains(&id.to_string()));
    }
}
