//! Wire-level constants shared across crates.

/// Length of an identifier in its canonical textual form (hyphenated UUID).
pub const IDENTIFIER_LEN: usize = 36;

/// Exact payload that asks the server to close the sender's own session.
pub const CLOSE_COMMAND: &[u8] = b"!";

/// WebSocket close code for a normal, requested closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code sent when the server is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Console line that triggers a reconnect (client) or restart (server).
pub const CONSOLE_RESTART: &str = "!";
