//! WebSocket session tasks and heartbeat.

pub mod connection;
pub mod heartbeat;

pub use connection::{SessionContext, run_ws_session};
