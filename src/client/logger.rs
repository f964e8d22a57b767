//! Client facade: lifecycle and record submission

use super::buffer::{offer, DropBuffer};
use super::sender::ReconnectingSender;
use super::{DropHook, ErrorHook, Message};
use crate::config::ClientConfig;
use crate::types::{LogOptions, Priority, Record};
use crate::{ClientError, Result};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builder for [`LogClient`]
pub struct LogClientBuilder {
    config: ClientConfig,
    on_drop: Option<DropHook>,
    on_error: Option<ErrorHook>,
}

impl LogClientBuilder {
    /// Start from the given configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            on_drop: None,
            on_error: None,
        }
    }

    /// Observe records discarded under overload. The hook runs on the buffer
    /// task or on the thread calling `log`, and must not block.
    pub fn with_drop_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.on_drop = Some(Arc::new(hook));
        self
    }

    /// Observe internal failures: connect errors, broken connections,
    /// encoding failures and, unless a drop hook is set, dropped records.
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Validate the configuration and build a closed client
    pub fn build(self) -> Result<LogClient> {
        self.config.validate()?;

        let on_error: ErrorHook = match self.on_error {
            Some(hook) => hook,
            None => Arc::new(|_: &ClientError| {}),
        };
        let on_drop: DropHook = match self.on_drop {
            Some(hook) => hook,
            None => {
                let on_error = on_error.clone();
                Arc::new(move |_: Record| on_error(&ClientError::RecordDropped))
            }
        };

        Ok(LogClient {
            inner: Arc::new(Inner {
                config: self.config,
                on_drop,
                on_error,
                intake: ArcSwapOption::empty(),
                running: Mutex::new(None),
            }),
        })
    }
}

/// Log client that ships records to an ECAppLog collector
///
/// Cloning is cheap; all clones share the same pipeline.
#[derive(Clone)]
pub struct LogClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    on_drop: DropHook,
    on_error: ErrorHook,
    intake: ArcSwapOption<Intake>,
    running: Mutex<Option<Running>>,
}

/// Producer side of the bounded intake channel. The receiver clone lets
/// `log` evict the oldest queued record instead of blocking.
struct Intake {
    tx: flume::Sender<Message>,
    rx: flume::Receiver<Message>,
}

impl Intake {
    fn offer(&self, message: Message, on_drop: &DropHook) {
        offer(&self.tx, &self.rx, message, on_drop);
    }
}

struct Running {
    cancel: CancellationToken,
    buffer: JoinHandle<u64>,
    sender: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl fmt::Debug for LogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogClient")
            .field("config", &self.inner.config)
            .field("open", &self.is_open())
            .finish()
    }
}

impl LogClient {
    /// Create a closed client with default hooks
    pub fn new(config: ClientConfig) -> Result<Self> {
        LogClientBuilder::new(config).build()
    }

    /// Builder with custom drop and error hooks
    pub fn builder(config: ClientConfig) -> LogClientBuilder {
        LogClientBuilder::new(config)
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Whether the pipeline is running
    pub fn is_open(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Start the buffer and sender tasks. Does nothing if already open.
    ///
    /// # Errors
    ///
    /// Fails when called outside a Tokio runtime.
    pub fn open(&self) -> Result<()> {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::Client(format!("open requires a Tokio runtime: {}", e)))?;

        let config = &self.inner.config;
        let (intake_tx, intake_rx) = flume::bounded(config.buffer_size.max(1));
        let (delivery_tx, delivery_rx) = flume::bounded(config.buffer_size);
        let cancel = CancellationToken::new();

        let buffer = DropBuffer::new(
            intake_rx.clone(),
            delivery_tx,
            delivery_rx.clone(),
            self.inner.on_drop.clone(),
        );
        let sender = ReconnectingSender::new(
            config.clone(),
            delivery_rx,
            cancel.clone(),
            self.inner.on_error.clone(),
        );

        let buffer = runtime.spawn(buffer.run());
        let sender = runtime.spawn(sender.run());

        self.inner.intake.store(Some(Arc::new(Intake {
            tx: intake_tx,
            rx: intake_rx,
        })));
        *running = Some(Running {
            cancel,
            buffer,
            sender,
        });

        info!(
            app = %config.app_name,
            address = %config.address,
            buffer_size = config.buffer_size,
            "ecapplog client opened"
        );
        Ok(())
    }

    /// Stop the pipeline and wait for the sender to finish. Does nothing if
    /// already closed.
    ///
    /// Records already submitted are moved into the delivery buffer first, so
    /// with `flush_on_close` they take part in the final drain.
    pub async fn close(&self) {
        let running = self.inner.running.lock().take();
        let Some(running) = running else {
            return;
        };
        // Cancels the sender even if this future is dropped before finishing.
        let _cancel_on_drop = running.cancel.clone().drop_guard();

        // Dropping the intake sender lets the buffer task finish its backlog and exit.
        self.inner.intake.store(None);
        match running.buffer.await {
            Ok(dropped) => debug!(dropped, "drop buffer finished"),
            Err(e) => warn!("drop buffer task failed: {}", e),
        }

        running.cancel.cancel();
        if let Err(e) = running.sender.await {
            warn!("sender task failed: {}", e);
        }

        info!(app = %self.inner.config.app_name, "ecapplog client closed");
    }

    /// Submit a record built from the arguments. Silently ignored while the
    /// client is closed.
    ///
    /// Never blocks. When the intake is full the oldest queued record goes to
    /// the drop hook.
    pub fn log<Tz, C, M>(
        &self,
        timestamp: DateTime<Tz>,
        priority: Priority,
        category: C,
        message: M,
        options: LogOptions,
    ) where
        Tz: TimeZone,
        C: Into<String>,
        M: Into<String>,
    {
        if let Some(intake) = &*self.inner.intake.load() {
            let record = Record::with_options(
                timestamp.with_timezone(&Utc),
                priority,
                category,
                message,
                options,
            );
            intake.offer(Message::Log(record), &self.inner.on_drop);
        }
    }

    /// Submit an already built record. Silently ignored while the client is
    /// closed.
    pub fn log_record(&self, record: Record) {
        if let Some(intake) = &*self.inner.intake.load() {
            intake.offer(Message::Log(record), &self.inner.on_drop);
        }
    }

    /// Log a debug message stamped with the current time
    pub fn debug<C: Into<String>, M: Into<String>>(&self, category: C, message: M) {
        self.log(Utc::now(), Priority::Debug, category, message, LogOptions::default());
    }

    /// Log an informational message stamped with the current time
    pub fn info<C: Into<String>, M: Into<String>>(&self, category: C, message: M) {
        self.log(Utc::now(), Priority::Information, category, message, LogOptions::default());
    }

    /// Log a warning stamped with the current time
    pub fn warning<C: Into<String>, M: Into<String>>(&self, category: C, message: M) {
        self.log(Utc::now(), Priority::Warning, category, message, LogOptions::default());
    }

    /// Log an error stamped with the current time
    pub fn error<C: Into<String>, M: Into<String>>(&self, category: C, message: M) {
        self.log(Utc::now(), Priority::Error, category, message, LogOptions::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn unused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn config(address: String) -> ClientConfig {
        ClientConfig {
            address,
            retry_interval_ms: 50,
            ..ClientConfig::new("logger-test")
        }
    }

    #[test]
    fn test_new_validates_config() {
        let invalid = ClientConfig {
            address: "nowhere".to_string(),
            ..Default::default()
        };
        match LogClient::new(invalid) {
            Err(ClientError::Config(_)) => {}
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_outside_runtime_fails() {
        let client = LogClient::new(ClientConfig::default()).unwrap();
        match client.open() {
            Err(ClientError::Client(msg)) => assert!(msg.contains("Tokio runtime")),
            other => panic!("Expected Client error, got {:?}", other),
        }
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_open_close_idempotent() {
        let client = LogClient::new(config(unused_address().await)).unwrap();
        assert!(!client.is_open());

        client.open().unwrap();
        client.open().unwrap();
        assert!(client.is_open());

        tokio::time::timeout(Duration::from_secs(2), client.close())
            .await
            .expect("close should not hang");
        assert!(!client.is_open());
        client.close().await;
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_log_while_closed_is_noop() {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = drops.clone();
        let client = LogClient::builder(config(unused_address().await))
            .with_drop_hook(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        client.info("app", "before open");
        client.log_record(Record::new(Utc::now(), Priority::Error, "app", "also ignored"));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_default_drop_hook_reports_to_error_hook() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let counter = dropped.clone();
        let client = LogClient::builder(ClientConfig {
            buffer_size: 2,
            ..config(unused_address().await)
        })
        .with_error_hook(move |e| {
            if matches!(e, ClientError::RecordDropped) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap();

        client.open().unwrap();
        for i in 0..5 {
            client.info("app", format!("record {}", i));
        }
        client.close().await;

        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_close_interrupts_long_retry_wait() {
        let client = LogClient::new(ClientConfig {
            retry_interval_ms: 60_000,
            ..config(unused_address().await)
        })
        .unwrap();

        client.open().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(1), client.close())
            .await
            .expect("close should interrupt the retry wait");
    }

    #[tokio::test]
    async fn test_burst_keeps_intake_bounded() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let counter = dropped.clone();
        let client = LogClient::builder(ClientConfig {
            buffer_size: 10,
            ..config(unused_address().await)
        })
        .with_drop_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
        client.open().unwrap();

        // No await in between, so the buffer task never gets to run.
        for i in 0..100_000 {
            client.info("burst", format!("{}", i));
        }

        let queued = match &*client.inner.intake.load() {
            Some(intake) => intake.tx.len(),
            None => panic!("intake should exist while open"),
        };
        assert!(queued <= 10, "intake holds {} records", queued);
        assert_eq!(dropped.load(Ordering::SeqCst), 100_000 - queued);

        client.close().await;
    }

    #[tokio::test]
    async fn test_interrupted_close_still_stops_sender() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = LogClient::new(config(listener.local_addr().unwrap().to_string())).unwrap();
        client.open().unwrap();

        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(stream.read_u8().await.unwrap(), 99);
        let len = stream.read_i32().await.unwrap();
        let mut banner = vec![0; len as usize];
        stream.read_exact(&mut banner).await.unwrap();

        // Abandon close at its first await point.
        let finished = tokio::select! {
            biased;
            _ = client.close() => true,
            _ = std::future::ready(()) => false,
        };
        assert!(!finished);
        assert!(!client.is_open());
        drop(client);

        let eof = tokio::time::timeout(Duration::from_secs(2), stream.read_u8())
            .await
            .expect("sender should close its connection");
        assert!(eof.is_err());
    }

    #[tokio::test]
    async fn test_reopen_after_close() {
        let client = LogClient::new(config(unused_address().await)).unwrap();
        client.open().unwrap();
        client.close().await;
        client.open().unwrap();
        assert!(client.is_open());
        client.close().await;
    }
}
