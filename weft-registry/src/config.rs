//! Registry connection configuration.

use std::time::Duration;

/// Configuration for the group registry connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Registry host name or address.
    pub host: String,
    /// Registry port.
    pub port: u16,
    /// How often this member refreshes its liveness entry.
    pub heart_beat_freq: Duration,
}

impl RegistryConfig {
    /// Creates a configuration pointing at a host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Sets the registry port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the heartbeat frequency.
    #[must_use]
    pub const fn with_heart_beat_freq(mut self, freq: Duration) -> Self {
        self.heart_beat_freq = freq;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            heart_beat_freq: Duration::from_secs(10),
        }
    }
}
