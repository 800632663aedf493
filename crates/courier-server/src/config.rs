//! Server configuration.

use std::time::Duration;

use courier_settings::ServerSettings;

/// Runtime configuration for [`CourierServer`](crate::server::CourierServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket sessions; further upgrades get `503`.
    pub max_connections: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Close a session after hearing nothing for this long.
    pub heartbeat_timeout: Duration,
    /// Outbound frames buffered per session.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Send `delivery.failed` notices to senders on routing failures.
    pub notify_sender_on_failure: bool,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            send_queue_capacity: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            notify_sender_on_failure: true,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval: s.heartbeat_interval(),
            heartbeat_timeout: s.heartbeat_timeout(),
            send_queue_capacity: s.send_queue_capacity,
            max_message_size: s.max_message_size,
            notify_sender_on_failure: s.notify_sender_on_failure,
        }
    }
}
