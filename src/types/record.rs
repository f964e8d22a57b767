//! Log record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category used when a caller does not supply one
pub const DEFAULT_CATEGORY: &str = "DEFAULT";

/// Log priorities understood by the collector, least severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Fine-grained tracing output
    Trace,
    /// Debug-level messages
    Debug,
    /// Informational messages
    Information,
    /// Normal but significant condition
    Notice,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions
    Critical,
    /// Action must be taken immediately
    Alert,
    /// System is unusable
    Emergency,
}

impl Priority {
    /// Wire name of this priority
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Trace => "TRACE",
            Priority::Debug => "DEBUG",
            Priority::Information => "INFORMATION",
            Priority::Notice => "NOTICE",
            Priority::Warning => "WARNING",
            Priority::Error => "ERROR",
            Priority::Critical => "CRITICAL",
            Priority::Alert => "ALERT",
            Priority::Emergency => "EMERGENCY",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional metadata carried alongside a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaField {
    /// Supplementary payload or the raw original line
    Source,
    /// Category before any remapping by the producer
    OriginalCategory,
    /// Additional categories the record belongs to
    ExtraCategories,
    /// Foreground color hint
    Color,
    /// Background color hint
    BgColor,
}

/// Value of a metadata field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Free-form text
    Text(String),
    /// List of strings
    List(Vec<String>),
}

impl MetaValue {
    fn is_empty(&self) -> bool {
        match self {
            MetaValue::Text(s) => s.is_empty(),
            MetaValue::List(v) => v.is_empty(),
        }
    }
}

/// Per-call options for a log submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    metadata: BTreeMap<MetaField, MetaValue>,
}

impl LogOptions {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach source text
    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.with(MetaField::Source, MetaValue::Text(source.into()))
    }

    /// Attach the original category
    pub fn with_original_category(self, category: impl Into<String>) -> Self {
        self.with(MetaField::OriginalCategory, MetaValue::Text(category.into()))
    }

    /// Attach extra categories
    pub fn with_extra_categories<I, S>(self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = categories.into_iter().map(Into::into).collect();
        self.with(MetaField::ExtraCategories, MetaValue::List(list))
    }

    /// Attach a foreground color hint
    pub fn with_color(self, color: impl Into<String>) -> Self {
        self.with(MetaField::Color, MetaValue::Text(color.into()))
    }

    /// Attach a background color hint
    pub fn with_bg_color(self, color: impl Into<String>) -> Self {
        self.with(MetaField::BgColor, MetaValue::Text(color.into()))
    }

    fn with(mut self, field: MetaField, value: MetaValue) -> Self {
        if value.is_empty() {
            self.metadata.remove(&field);
        } else {
            self.metadata.insert(field, value);
        }
        self
    }
}

/// A single log event, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    timestamp: DateTime<Utc>,
    priority: Priority,
    category: String,
    message: String,
    metadata: BTreeMap<MetaField, MetaValue>,
}

impl Record {
    /// Create a record without metadata
    pub fn new(
        timestamp: DateTime<Utc>,
        priority: Priority,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::with_options(timestamp, priority, category, message, LogOptions::default())
    }

    /// Create a record carrying the given per-call options
    pub fn with_options(
        timestamp: DateTime<Utc>,
        priority: Priority,
        category: impl Into<String>,
        message: impl Into<String>,
        options: LogOptions,
    ) -> Self {
        let mut category = category.into();
        if category.is_empty() {
            category = DEFAULT_CATEGORY.to_string();
        }

        Self {
            timestamp,
            priority,
            category,
            message: message.into(),
            metadata: options.metadata,
        }
    }

    /// Time of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Event priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Category of the emitting subsystem
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Log message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Raw metadata value for a field
    pub fn meta(&self, field: MetaField) -> Option<&MetaValue> {
        self.metadata.get(&field)
    }

    /// All metadata, ordered by field
    pub fn metadata(&self) -> impl Iterator<Item = (MetaField, &MetaValue)> {
        self.metadata.iter().map(|(k, v)| (*k, v))
    }

    /// Source text, if any
    pub fn source(&self) -> Option<&str> {
        self.text(MetaField::Source)
    }

    /// Original category, if any
    pub fn original_category(&self) -> Option<&str> {
        self.text(MetaField::OriginalCategory)
    }

    /// Extra categories, empty if none
    pub fn extra_categories(&self) -> &[String] {
        match self.metadata.get(&MetaField::ExtraCategories) {
            Some(MetaValue::List(list)) => list,
            _ => &[],
        }
    }

    /// Foreground color hint, if any
    pub fn color(&self) -> Option<&str> {
        self.text(MetaField::Color)
    }

    /// Background color hint, if any
    pub fn bg_color(&self) -> Option<&str> {
        self.text(MetaField::BgColor)
    }

    fn text(&self, field: MetaField) -> Option<&str> {
        match self.metadata.get(&field) {
            Some(MetaValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        write!(f, "{} {} {}: {}", timestamp, self.priority, self.category, self.message)
    }
}
