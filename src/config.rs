//! Broker configuration

use crate::backend::DEFAULT_RECONNECT_DELAY;
use crate::error::{BrokerError, Result};
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BACKEND_URL: &str = "ws://localhost:5001";
/// Client frames carry base64 audio; matches the backend's frame limit
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 20 * 1024 * 1024;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Address to listen on for client connections
    pub host: String,
    /// Port to listen on (`0` picks a free port)
    pub port: u16,
    /// WebSocket endpoint of the backend service
    pub backend_url: String,
    /// Fixed delay between a backend close and the next attempt
    pub reconnect_delay: Duration,
    /// Largest accepted client frame, in bytes
    pub max_message_size: usize,
    /// Interval between WebSocket pings sent to each client
    pub heartbeat_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl BrokerConfig {
    /// Loopback config on an ephemeral port, for tests and embedding
    pub fn local(backend_url: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            backend_url: backend_url.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        // The backend client is built without TLS support
        if !self.backend_url.starts_with("ws://") {
            return Err(BrokerError::Config(format!(
                "backend URL must start with ws://, got '{}'",
                self.backend_url
            )));
        }
        if self.reconnect_delay.is_zero() {
            return Err(BrokerError::Config(
                "reconnect delay must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(BrokerError::Config(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(BrokerError::Config(
                "max message size must be greater than zero".to_string(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| BrokerError::Config(format!("invalid listen address: {}", e)))
    }
}
