use std::time::Duration;

use clap::Parser;

/// Line based chat relay
#[derive(Parser, Clone, Debug)]
#[command(name = "chat-server", version, about = "Line based chat relay")]
pub struct Config {
    /// Bind address
    #[arg(long, env = "CHAT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Ask every client for a display name before relaying its lines
    #[arg(long, env = "CHAT_NAMING")]
    pub naming: bool,

    /// Seconds between keep-alive lines, 0 disables them
    #[arg(long, env = "CHAT_KEEPALIVE_SECS", default_value_t = 240)]
    pub keepalive_secs: u64,

    /// Longest accepted line in bytes. Longer lines drop the connection.
    #[arg(long, env = "CHAT_MAX_LINE_LENGTH", default_value_t = chat::DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,

    /// Lines queued per client before it counts as unwritable
    #[arg(long, env = "CHAT_OUTBOUND_CAPACITY", default_value_t = 256)]
    pub outbound_capacity: usize,

    /// Seconds to wait for connections to flush on shutdown
    #[arg(long, env = "CHAT_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Enable structured JSON logging
    #[arg(long, env = "CHAT_JSON_LOGS")]
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            naming: false,
            keepalive_secs: 240,
            max_line_length: chat::DEFAULT_MAX_LINE_LENGTH,
            outbound_capacity: 256,
            shutdown_timeout_secs: 5,
            json_logs: false,
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
