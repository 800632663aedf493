//! Settings schema.
//!
//! Field names are camelCase on disk. Every struct is `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Relay server settings.
    pub server: ServerSettings,
    /// Request/response client settings.
    pub client: ClientSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl CourierSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()
    }
}

/// Relay server network and session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket sessions.
    pub max_connections: usize,
    /// Interval between server Ping frames, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// A peer silent for longer than this is disconnected, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Outbound frames buffered per session before sends start failing.
    pub send_queue_capacity: usize,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Send a `delivery.failed` notice to the sender when routing misses.
    pub notify_sender_on_failure: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            send_queue_capacity: 1024,
            max_message_size: 16 * 1024 * 1024,
            notify_sender_on_failure: true,
        }
    }
}

impl ServerSettings {
    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "server.heartbeatIntervalMs",
                "must be positive",
            ));
        }
        if self.heartbeat_timeout_ms < self.heartbeat_interval_ms {
            return Err(SettingsError::invalid(
                "server.heartbeatTimeoutMs",
                format!(
                    "{} is shorter than heartbeatIntervalMs ({})",
                    self.heartbeat_timeout_ms, self.heartbeat_interval_ms
                ),
            ));
        }
        if self.send_queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "server.sendQueueCapacity",
                "must be positive",
            ));
        }
        if self.max_connections == 0 {
            return Err(SettingsError::invalid("server.maxConnections", "must be positive"));
        }
        Ok(())
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Request/response client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// `host:port` to connect to.
    pub address: String,
    /// Give up opening the transport after this many milliseconds.
    pub connect_timeout_ms: u64,
    /// Give up waiting for the handshake reply after this many milliseconds.
    pub handshake_timeout_ms: u64,
    /// Per-request deadline measured from submit; `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    /// Encoded requests buffered toward the transport.
    pub send_queue_capacity: usize,
    /// Protocol named in the `Upgrade` handshake; `None` skips the upgrade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            request_timeout_ms: None,
            send_queue_capacity: 256,
            upgrade: None,
        }
    }
}

impl ClientSettings {
    fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(SettingsError::invalid("client.address", "is empty"));
        }
        if self.send_queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "client.sendQueueCapacity",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
