//! # courier-core
//!
//! Foundation types shared by the Courier server, client, and CLI.
//!
//! - **Identifiers**: [`Identifier`], the fixed-width UUID naming one live peer
//! - **Constants**: addressing prefix length, control payloads, close codes
//! - **Notices**: [`Notice`] envelopes the server sends to peers about their
//!   own session (connection established, delivery failed)

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod notice;

pub use ids::{Identifier, IdentifierError};
pub use notice::{Notice, NoticeType};
pub use uuid::Uuid;
