//! Collector wire protocol

pub mod codec;

pub use codec::{
    banner_payload, encode_record, frame_len, write_banner, write_frame, write_record, Command,
    ProtocolVersion, BANNER_PREFIX, TIME_FORMAT,
};
