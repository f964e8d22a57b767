//! Persistent-reconnect sender
//!
//! One task owns the TCP connection. Each session dials the collector, writes
//! the banner and then streams records from the delivery channel until the
//! connection fails or the client is closed. Failed sessions are retried
//! after a fixed interval; cancellation interrupts every wait.

use super::{ErrorHook, Message};
use crate::config::ClientConfig;
use crate::protocol::{encode_record, write_banner, write_record};
use crate::types::Record;
use crate::{ClientError, Result};
use flume::Receiver;
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How a streaming session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Cancellation observed between records
    Cancelled,
    /// Shutdown raced with a closed connection; nothing left to drain
    Abandoned,
}

pub(crate) struct ReconnectingSender {
    config: ClientConfig,
    delivery: Receiver<Message>,
    cancel: CancellationToken,
    on_error: ErrorHook,
}

impl ReconnectingSender {
    pub(crate) fn new(
        config: ClientConfig,
        delivery: Receiver<Message>,
        cancel: CancellationToken,
        on_error: ErrorHook,
    ) -> Self {
        Self {
            config,
            delivery,
            cancel,
            on_error,
        }
    }

    /// Run sessions until cancelled. Returning is the completion signal.
    pub(crate) async fn run(self) {
        loop {
            if let Err(err) = self.session().await {
                self.report(err);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.config.retry_interval()) => {
                    debug!(address = %self.config.address, "retrying collector connection");
                }
            }
        }

        info!(address = %self.config.address, "sender closed");
    }

    async fn session(&self) -> Result<()> {
        let Some(mut stream) = self.connect().await? else {
            return Ok(());
        };
        stream.set_nodelay(true)?;

        write_banner(&mut stream, &self.config.app_name).await?;
        info!(address = %self.config.address, app = %self.config.app_name, "connected to collector");

        match self.stream_records(&mut stream).await {
            Ok(SessionEnd::Cancelled) => {
                if self.config.flush_on_close {
                    self.drain(&mut stream).await;
                }
                let _ = stream.shutdown().await;
                Ok(())
            }
            Ok(SessionEnd::Abandoned) => Ok(()),
            Err(err) => {
                debug!(error = %err, "collector connection lost");
                Err(err)
            }
        }
    }

    async fn connect(&self) -> Result<Option<TcpStream>> {
        let address = &self.config.address;

        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            result = timeout(self.config.connect_timeout(), TcpStream::connect(address)) => {
                let stream = result
                    .map_err(|_| ClientError::ConnectTimeout(address.clone()))?
                    .map_err(|e| {
                        ClientError::Connection(format!("Failed to connect to {}: {}", address, e))
                    })?;
                Ok(Some(stream))
            }
        }
    }

    async fn stream_records(&self, stream: &mut TcpStream) -> Result<SessionEnd> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                message = self.delivery.recv_async() => message,
            };

            let record = match message {
                Ok(Message::Log(record)) => record,
                Err(_) => {
                    // Delivery side is gone; nothing more will arrive.
                    self.cancel.cancelled().await;
                    return Ok(SessionEnd::Cancelled);
                }
            };

            let Some(payload) = self.encode(&record) else {
                continue;
            };

            if let Err(err) = self.send(stream, &payload).await {
                if self.cancel.is_cancelled() && is_closed_connection(&err) {
                    return Ok(SessionEnd::Abandoned);
                }
                return Err(err);
            }
        }
    }

    /// Write one frame. If the client is closed mid-write, the frame in flight
    /// gets the flush window to complete.
    async fn send(&self, stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
        let write = write_record(stream, payload);
        tokio::pin!(write);

        tokio::select! {
            biased;
            result = &mut write => result,
            _ = self.cancel.cancelled() => {
                timeout(self.config.flush_timeout(), write)
                    .await
                    .map_err(|_| ClientError::Connection("write timed out during shutdown".to_string()))?
            }
        }
    }

    async fn drain(&self, stream: &mut TcpStream) {
        let window = self.config.flush_timeout();
        let mut flushed = 0usize;

        while let Ok(Message::Log(record)) = self.delivery.try_recv() {
            let Some(payload) = self.encode(&record) else {
                continue;
            };

            match timeout(window, write_record(stream, &payload)).await {
                Ok(Ok(())) => flushed += 1,
                Ok(Err(err)) => {
                    self.report(err);
                    break;
                }
                Err(_) => {
                    self.report(ClientError::Connection(
                        "flush on close timed out".to_string(),
                    ));
                    break;
                }
            }
        }

        debug!(flushed, remaining = self.delivery.len(), "flushed on close");
    }

    fn encode(&self, record: &Record) -> Option<Vec<u8>> {
        match encode_record(record, self.config.protocol) {
            Ok(payload) => Some(payload),
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    fn report(&self, err: ClientError) {
        debug!(error = %err, "ecapplog client error");
        (self.on_error)(&err);
    }
}

/// Errors that mean the peer or the socket is already gone
fn is_closed_connection(err: &ClientError) -> bool {
    match err {
        ClientError::Io(e) => matches!(
            e.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
        ),
        _ => false,
    }
}
