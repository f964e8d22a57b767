//! # ecapplog - Asynchronous log shipping to an ECAppLog collector
//!
//! The client decouples application code from a flaky link to a remote
//! collector. Records are handed to an in-memory pipeline that buffers them,
//! drops the oldest ones under sustained overload, and ships them over a
//! persistent TCP connection that is re-established whenever it breaks.
//!
//! ## Features
//!
//! - **Never blocks producers**: `log` is a synchronous, non-blocking handoff
//! - **Bounded memory**: a drop-oldest delivery buffer with a drop hook
//! - **Transparent reconnects**: fixed-interval redial with a handshake banner per connection
//! - **Flush on close**: optional best-effort drain of the backlog on shutdown
//! - **`tracing` integration**: a subscriber layer that forwards events as records
//!
//! ## Quick Start
//!
//! ```no_run
//! use ecapplog::prelude::*;
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig {
//!         flush_on_close: true,
//!         ..ClientConfig::new("my-daemon")
//!     };
//!     let client = LogClient::new(config)?;
//!     client.open()?;
//!
//!     client.log(
//!         Utc::now(),
//!         Priority::Information,
//!         "auth",
//!         "Authentication successful",
//!         LogOptions::new().with_extra_categories(["audit"]),
//!     );
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod protocol;
pub mod types;

/// Common error types used throughout the client
pub mod error {
    use std::fmt;

    /// Client error types
    #[derive(Debug)]
    pub enum ClientError {
        /// I/O operation failed
        Io(std::io::Error),
        /// Record serialization failed
        Serde(serde_json::Error),
        /// Configuration error
        Config(String),
        /// Client lifecycle error
        Client(String),
        /// Connection error
        Connection(String),
        /// Dialing the collector did not finish in time
        ConnectTimeout(String),
        /// Payload does not fit the frame length field
        FrameTooLarge(usize),
        /// A buffered record was discarded to make room
        RecordDropped,
    }

    impl fmt::Display for ClientError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ClientError::Io(e) => write!(f, "I/O error: {}", e),
                ClientError::Serde(e) => write!(f, "Serialization error: {}", e),
                ClientError::Config(e) => write!(f, "Configuration error: {}", e),
                ClientError::Client(e) => write!(f, "Client error: {}", e),
                ClientError::Connection(e) => write!(f, "Connection error: {}", e),
                ClientError::ConnectTimeout(addr) => {
                    write!(f, "Connection error: timed out connecting to {}", addr)
                }
                ClientError::FrameTooLarge(len) => {
                    write!(f, "Frame error: payload of {} bytes is too large", len)
                }
                ClientError::RecordDropped => write!(f, "Dropped older message"),
            }
        }
    }

    impl std::error::Error for ClientError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                ClientError::Io(e) => Some(e),
                ClientError::Serde(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<std::io::Error> for ClientError {
        fn from(err: std::io::Error) -> Self {
            ClientError::Io(err)
        }
    }

    impl From<serde_json::Error> for ClientError {
        fn from(err: serde_json::Error) -> Self {
            ClientError::Serde(err)
        }
    }

    /// Result type alias for client operations
    pub type Result<T> = std::result::Result<T, ClientError>;
}

pub use error::{ClientError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{EcapplogLayer, LogClient, LogClientBuilder};
    pub use crate::config::{ClientConfig, LayerConfig};
    pub use crate::protocol::ProtocolVersion;
    pub use crate::types::{LogOptions, Priority, Record};
    pub use crate::{ClientError, Result};
}
