//! Configuration structures for the ECAppLog client

use crate::protocol::ProtocolVersion;
use crate::types::Priority;
use crate::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application name used when none is configured
pub const DEFAULT_APP_NAME: &str = "ECAPPLOG-RS";

/// Collector address used when none is configured
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:13991";

/// Client configuration, fixed for the lifetime of a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Application name sent in the banner
    pub app_name: String,
    /// Collector `host:port`
    pub address: String,
    /// Capacity of the delivery channel
    pub buffer_size: usize,
    /// Drain buffered records before closing
    pub flush_on_close: bool,
    /// Record schema revision
    pub protocol: ProtocolVersion,
    /// Dial timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Delay between reconnect attempts in milliseconds
    pub retry_interval_ms: u64,
    /// Time allowed for each record while draining on close, in milliseconds
    pub flush_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            buffer_size: 1000,
            flush_on_close: false,
            protocol: ProtocolVersion::V1,
            connect_timeout_ms: 10_000,
            retry_interval_ms: 5_000,
            flush_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    /// Default configuration with the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(ClientError::Config("Application name cannot be empty".to_string()));
        }
        if self.address.is_empty() {
            return Err(ClientError::Config("Collector address cannot be empty".to_string()));
        }
        match self.address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(ClientError::Config(format!(
                    "Collector address must be host:port, got {}",
                    self.address
                )))
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::Config("Connect timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Dial timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay between reconnect attempts
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Per-record timeout while draining on close
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Settings for the `tracing` layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// Event field holding the record category
    pub category_key: String,
    /// Events below this priority are skipped
    pub min_priority: Priority,
    /// Put the JSON of the event and span fields into `source`
    pub include_fields: bool,
    /// Optional message template, see [`MessageTemplate`](crate::client::MessageTemplate)
    pub message_template: Option<String>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            category_key: "category".to_string(),
            min_priority: Priority::Debug,
            include_fields: true,
            message_template: None,
        }
    }
}
