//! Framed wire codec for the collector protocol
//!
//! Every frame is a command byte, a big-endian `i32` payload length and the
//! payload itself. The client only ever writes frames.

use crate::types::{MetaField, MetaValue, Priority, Record};
use crate::{ClientError, Result};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Prefix of the banner payload
pub const BANNER_PREFIX: &str = "ECAPPLOG";

/// Timestamp layout used in record frames
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Frame command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// A JSON encoded record
    Log = 0,
    /// Connection handshake carrying the application name
    Banner = 99,
}

impl Command {
    /// Byte value written on the wire
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Record schema revision spoken by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// source, original_category and extra_categories
    #[default]
    V1,
    /// V1 plus color and bg_color hints
    V2,
}

impl ProtocolVersion {
    /// Whether records in this revision may carry the given field
    pub fn allows(&self, field: MetaField) -> bool {
        match field {
            MetaField::Source | MetaField::OriginalCategory | MetaField::ExtraCategories => true,
            MetaField::Color | MetaField::BgColor => matches!(self, ProtocolVersion::V2),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "v1"),
            ProtocolVersion::V2 => write!(f, "v2"),
        }
    }
}

struct WireTime(DateTime<Utc>);

impl Serialize for WireTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.format(TIME_FORMAT))
    }
}

#[derive(Serialize)]
struct WireRecord<'a> {
    time: WireTime,
    priority: Priority,
    category: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a MetaValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_category: Option<&'a MetaValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_categories: Option<&'a MetaValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<&'a MetaValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bg_color: Option<&'a MetaValue>,
}

impl<'a> WireRecord<'a> {
    fn new(record: &'a Record, version: ProtocolVersion) -> Self {
        let field = |f: MetaField| {
            if version.allows(f) {
                record.meta(f)
            } else {
                None
            }
        };

        Self {
            time: WireTime(record.timestamp()),
            priority: record.priority(),
            category: record.category(),
            message: record.message(),
            source: field(MetaField::Source),
            original_category: field(MetaField::OriginalCategory),
            extra_categories: field(MetaField::ExtraCategories),
            color: field(MetaField::Color),
            bg_color: field(MetaField::BgColor),
        }
    }
}

/// Payload of the banner frame
pub fn banner_payload(app_name: &str) -> Vec<u8> {
    format!("{} {}", BANNER_PREFIX, app_name).into_bytes()
}

/// Length prefix for a payload of `len` bytes
pub fn frame_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| ClientError::FrameTooLarge(len))
}

/// JSON payload of a record frame. Fails with `FrameTooLarge` when the
/// payload cannot be framed, so oversized records never reach the socket.
pub fn encode_record(record: &Record, version: ProtocolVersion) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&WireRecord::new(record, version))?;
    frame_len(payload.len())?;
    Ok(payload)
}

/// Write one frame as three writes: command, length, payload
pub async fn write_frame<W>(writer: &mut W, command: Command, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = frame_len(payload.len())?;

    writer.write_u8(command.as_byte()).await?;
    writer.write_i32(len).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Write the handshake banner
pub async fn write_banner<W>(writer: &mut W, app_name: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, Command::Banner, &banner_payload(app_name)).await
}

/// Write an already encoded record payload
pub async fn write_record<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, Command::Log, payload).await
}
