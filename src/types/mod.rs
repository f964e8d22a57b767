//! Core data types shared by the client and the codec

pub mod record;

pub use record::{LogOptions, MetaField, MetaValue, Priority, Record, DEFAULT_CATEGORY};
