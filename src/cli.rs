use crate::config::{BrokerConfig, DEFAULT_BACKEND_URL, DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const LONG_ABOUT: &str = r#"
Speaker Broker - WebSocket relay between front-end clients and the speaker
recognition service

Clients send JSON requests:
  {"action": "identify", "fileName": "a.wav", "audioData": "<base64>"}
  {"action": "extract", "fileName": "a.wav", "audioData": "<base64>", "speakerName": "Alice"}
  {"action": "diarize", "fileName": "a.wav", "audioData": "<base64>"}
  {"action": "view_embeddings"}

Every reply from the backend service is broadcast to all connected clients.
Validation and availability errors go to the requesting client only.
"#;

#[derive(Parser, Clone, Debug)]
#[command(name = "speaker-broker")]
#[command(about = "WebSocket broker for the speaker recognition service")]
#[command(long_about = LONG_ABOUT)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output (-q)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json: bool,

    /// Write logs to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// IP address to listen on
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on for client connections
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// WebSocket URL of the backend service
    #[arg(long, env = "BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Delay before reconnecting to the backend, in milliseconds
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 3000)]
    pub reconnect_delay_ms: u64,

    /// Largest accepted client message, in bytes
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value_t = 20 * 1024 * 1024)]
    pub max_message_size: usize,

    /// Seconds between pings sent to each client
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,
}

impl Cli {
    pub fn into_config(self) -> BrokerConfig {
        BrokerConfig {
            host: self.host,
            port: self.port,
            backend_url: self.backend_url,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_message_size: self.max_message_size,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
        }
    }
}
