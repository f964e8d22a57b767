//! Configuration management for the ECAppLog client

pub mod settings;

pub use settings::{ClientConfig, LayerConfig, DEFAULT_ADDRESS, DEFAULT_APP_NAME};
