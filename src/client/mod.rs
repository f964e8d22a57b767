//! ECAppLog client implementation

mod buffer;
pub mod layer;
pub mod logger;
mod sender;
pub mod template;

use crate::types::Record;
use crate::ClientError;
use std::sync::Arc;

pub use layer::EcapplogLayer;
pub use logger::{LogClient, LogClientBuilder};
pub use template::MessageTemplate;

/// Called with each record discarded by the delivery buffer
pub type DropHook = Arc<dyn Fn(Record) + Send + Sync>;

/// Receives every internal failure of the client
pub type ErrorHook = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Work items carried from the producer to the sender
#[derive(Debug)]
pub(crate) enum Message {
    Log(Record),
}
