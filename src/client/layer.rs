//! `tracing` subscriber layer forwarding events to a [`LogClient`]
//!
//! ```no_run
//! use ecapplog::prelude::*;
//! use tracing_subscriber::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let client = LogClient::new(ClientConfig::new("my-service"))?;
//! client.open()?;
//!
//! tracing_subscriber::registry()
//!     .with(EcapplogLayer::new(client.clone(), LayerConfig::default()))
//!     .init();
//!
//! tracing::info!(category = "http", status = 200, "request served");
//! # client.close().await;
//! # Ok(())
//! # }
//! ```

use super::template::MessageTemplate;
use super::LogClient;
use crate::config::LayerConfig;
use crate::types::{LogOptions, Priority, DEFAULT_CATEGORY};
use crate::ClientError;
use chrono::Utc;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record as SpanRecord};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

const INTERNAL_TARGET: &str = "ecapplog";

type LevelFn = Arc<dyn Fn(&Level) -> Priority + Send + Sync>;

/// Layer that turns `tracing` events into collector records
///
/// Fields of the enclosing spans are visible to the category lookup, the
/// message template and the `source` payload. Event fields win over span
/// fields, inner spans over outer ones.
#[derive(Clone)]
pub struct EcapplogLayer {
    client: LogClient,
    config: LayerConfig,
    template: Option<Arc<std::result::Result<MessageTemplate, ClientError>>>,
    level_fn: Option<LevelFn>,
}

impl fmt::Debug for EcapplogLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcapplogLayer")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("custom_levels", &self.level_fn.is_some())
            .finish()
    }
}

impl EcapplogLayer {
    /// Forward events to `client` using `config`
    pub fn new(client: LogClient, config: LayerConfig) -> Self {
        let template = config
            .message_template
            .as_deref()
            .map(|source| Arc::new(MessageTemplate::parse(source)));

        Self {
            client,
            config,
            template,
            level_fn: None,
        }
    }

    /// Override the level to priority mapping
    pub fn with_level_fn<F>(mut self, level_fn: F) -> Self
    where
        F: Fn(&Level) -> Priority + Send + Sync + 'static,
    {
        self.level_fn = Some(Arc::new(level_fn));
        self
    }

    fn priority(&self, level: &Level) -> Priority {
        match &self.level_fn {
            Some(f) => f(level),
            None => default_priority(level),
        }
    }

    fn render_message(&self, message: &str, fields: &Map<String, Value>) -> String {
        match self.template.as_deref() {
            None => message.to_string(),
            Some(Ok(template)) => template.render(message, |name| fields.get(name).map(value_text)),
            Some(Err(e)) => format!("{} (template error: {})", message, e),
        }
    }
}

/// Default mapping from `tracing` levels to priorities
pub fn default_priority(level: &Level) -> Priority {
    match *level {
        Level::TRACE => Priority::Trace,
        Level::DEBUG => Priority::Debug,
        Level::INFO => Priority::Information,
        Level::WARN => Priority::Warning,
        Level::ERROR => Priority::Error,
    }
}

fn is_internal(target: &str) -> bool {
    target == INTERNAL_TARGET
        || target
            .strip_prefix(INTERNAL_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fields recorded on a span, kept in its extensions
struct SpanFields(Map<String, Value>);

impl<S> Layer<S> for EcapplogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        // Another instance of this layer may have recorded the span already.
        if extensions.get_mut::<SpanFields>().is_none() {
            let mut fields = Map::new();
            attrs.record(&mut JsonVisitor(&mut fields));
            extensions.insert(SpanFields(fields));
        }
    }

    fn on_record(&self, id: &Id, values: &SpanRecord<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(SpanFields(fields)) = extensions.get_mut::<SpanFields>() {
            values.record(&mut JsonVisitor(fields));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal(metadata.target()) {
            return;
        }

        let priority = self.priority(metadata.level());
        if priority < self.config.min_priority {
            return;
        }

        let mut fields = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(SpanFields(span_fields)) = span.extensions().get::<SpanFields>() {
                    for (name, value) in span_fields {
                        fields.insert(name.clone(), value.clone());
                    }
                }
            }
        }

        let mut event_fields = Map::new();
        event.record(&mut JsonVisitor(&mut event_fields));
        let message = event_fields
            .remove("message")
            .map(|value| value_text(&value))
            .unwrap_or_default();
        fields.extend(event_fields);

        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            fields.insert("source".to_string(), Value::String(format!("{}:{}", file, line)));
        }

        let category = fields
            .get(&self.config.category_key)
            .map(value_text)
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let mut options = LogOptions::new();
        if self.config.include_fields && !fields.is_empty() {
            let source = match serde_json::to_string(&fields) {
                Ok(json) => format!("{} {}", message, json),
                Err(e) => format!("failed to marshal attributes: {}", e),
            };
            options = options.with_source(source);
        }

        let text = self.render_message(&message, &fields);
        self.client.log(Utc::now(), priority, category, text, options);
    }
}

/// Collects fields as JSON values
struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl JsonVisitor<'_> {
    fn insert(&mut self, field: &Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tracing_subscriber::prelude::*;

    async fn read_json(stream: &mut TcpStream) -> serde_json::Value {
        let command = stream.read_u8().await.unwrap();
        let len = stream.read_i32().await.unwrap();
        let mut payload = vec![0; len as usize];
        stream.read_exact(&mut payload).await.unwrap();
        assert_eq!(command, 0);
        serde_json::from_slice(&payload).unwrap()
    }

    #[test]
    fn test_default_priority_mapping() {
        assert_eq!(default_priority(&Level::TRACE), Priority::Trace);
        assert_eq!(default_priority(&Level::DEBUG), Priority::Debug);
        assert_eq!(default_priority(&Level::INFO), Priority::Information);
        assert_eq!(default_priority(&Level::WARN), Priority::Warning);
        assert_eq!(default_priority(&Level::ERROR), Priority::Error);
    }

    #[test]
    fn test_internal_targets() {
        assert!(is_internal("ecapplog"));
        assert!(is_internal("ecapplog::client::sender"));
        assert!(!is_internal("ecapplog_demo"));
        assert!(!is_internal("my_app"));
    }

    #[tokio::test]
    async fn test_events_become_records() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = LogClient::new(ClientConfig {
            address: listener.local_addr().unwrap().to_string(),
            ..ClientConfig::new("layer-test")
        })
        .unwrap();
        client.open().unwrap();

        let layer = EcapplogLayer::new(
            client.clone(),
            LayerConfig {
                min_priority: Priority::Information,
                ..Default::default()
            },
        )
        .with_level_fn(|level| match *level {
            Level::ERROR => Priority::Critical,
            ref other => default_priority(other),
        });
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("below threshold");
            tracing::info!(category = "http", status = 200u64, "request served");
            tracing::error!("plain failure");
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let _banner = stream.read_u8().await.unwrap();
        let len = stream.read_i32().await.unwrap();
        let mut banner = vec![0; len as usize];
        stream.read_exact(&mut banner).await.unwrap();

        let first = read_json(&mut stream).await;
        assert_eq!(first["priority"], "INFORMATION");
        assert_eq!(first["category"], "http");
        assert_eq!(first["message"], "request served");
        let source = first["source"].as_str().unwrap();
        assert!(source.starts_with("request served {"));
        assert!(source.contains("\"status\":200"));

        let second = read_json(&mut stream).await;
        assert_eq!(second["priority"], "CRITICAL");
        assert_eq!(second["category"], DEFAULT_CATEGORY);
        assert_eq!(second["message"], "plain failure");

        client.close().await;
    }

    async fn accept_after_banner(listener: &TcpListener) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), 99);
        let len = stream.read_i32().await.unwrap();
        let mut banner = vec![0; len as usize];
        stream.read_exact(&mut banner).await.unwrap();
        stream
    }

    async fn open_client(listener: &TcpListener) -> LogClient {
        let client = LogClient::new(ClientConfig {
            address: listener.local_addr().unwrap().to_string(),
            ..ClientConfig::new("layer-test")
        })
        .unwrap();
        client.open().unwrap();
        client
    }

    #[tokio::test]
    async fn test_span_fields_reach_category_and_source() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = open_client(&listener).await;
        let subscriber = tracing_subscriber::registry()
            .with(EcapplogLayer::new(client.clone(), LayerConfig::default()));

        tracing::subscriber::with_default(subscriber, || {
            let outer = tracing::info_span!("request", category = "http", user = tracing::field::Empty);
            let _outer = outer.enter();
            outer.record("user", "ann");

            let inner = tracing::info_span!("handler", route = "/login", user = "bob");
            let _inner = inner.enter();
            tracing::info!(status = 200u64, "served");
        });

        let mut stream = accept_after_banner(&listener).await;
        let record = read_json(&mut stream).await;
        assert_eq!(record["category"], "http");
        assert_eq!(record["message"], "served");

        let source = record["source"].as_str().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(source.strip_prefix("served ").unwrap()).unwrap();
        assert_eq!(json["route"], "/login");
        assert_eq!(json["user"], "bob");
        assert_eq!(json["status"], 200);
        assert!(json["source"].as_str().unwrap().contains("layer.rs:"));

        client.close().await;
    }

    #[tokio::test]
    async fn test_message_template() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = open_client(&listener).await;
        let config = LayerConfig {
            include_fields: false,
            message_template: Some("[{user}] {message}{?status} -> {status}{/status}".to_string()),
            ..Default::default()
        };
        let broken = LayerConfig {
            message_template: Some("{message".to_string()),
            ..config.clone()
        };
        let subscriber = tracing_subscriber::registry()
            .with(EcapplogLayer::new(client.clone(), config))
            .with(EcapplogLayer::new(client.clone(), broken));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("session", user = tracing::field::Empty);
            span.record("user", "ann");
            let _guard = span.enter();
            tracing::info!(status = 404u64, "not found");
        });

        let mut stream = accept_after_banner(&listener).await;
        let rendered = read_json(&mut stream).await;
        assert_eq!(rendered["message"], "[ann] not found -> 404");
        assert!(rendered.get("source").is_none());

        let fallback = read_json(&mut stream).await;
        let message = fallback["message"].as_str().unwrap();
        assert!(message.starts_with("not found (template error:"), "{}", message);

        client.close().await;
    }
}

