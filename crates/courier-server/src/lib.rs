//! # courier-server
//!
//! WebSocket relay with directed messaging.
//!
//! - [`SessionDirectory`]: identifier → live [`Session`] registry
//! - [`MessageRouter`]: strips a leading identifier and forwards the rest to
//!   that session; reports misses to the sender only
//! - [`CourierServer`]: Axum app serving `/ws`, `/health`, and `/metrics`,
//!   with heartbeat, connection limit, and graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod directory;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use directory::SessionDirectory;
pub use errors::{DirectoryError, RouteError};
pub use router::{MessageRouter, RouteOutcome};
pub use server::CourierServer;
pub use session::{Outbound, Payload, Session};
pub use shutdown::ShutdownCoordinator;
