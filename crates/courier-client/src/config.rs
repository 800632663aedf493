//! Client configuration.

use std::time::Duration;

use courier_settings::ClientSettings;

/// Timeouts applied by a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long to wait for the handshake reply once the transport connects.
    pub handshake_timeout: Duration,
    /// Default per-request deadline; `None` waits until the link drops.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
            request_timeout: settings.request_timeout_ms.map(Duration::from_millis),
        }
    }
}
