//! In-process collector used by the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One frame as seen by the collector
#[derive(Debug, Clone)]
pub struct Frame {
    /// Index of the connection the frame arrived on, in accept order
    pub connection: usize,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_banner(&self) -> bool {
        self.command == 99
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.payload.clone()).expect("payload is UTF-8")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("payload is JSON")
    }

    pub fn message(&self) -> String {
        self.json()["message"]
            .as_str()
            .expect("record has a message")
            .to_string()
    }
}

/// TCP listener that records every frame it receives
pub struct TestCollector {
    pub address: SocketAddr,
    frames: mpsc::UnboundedReceiver<Frame>,
    accept_task: JoinHandle<()>,
}

impl TestCollector {
    /// Listen on an ephemeral local port
    pub async fn start() -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap(), None).await
    }

    /// Listen on `address`; the first connection is closed after
    /// `close_first_after` frames when set
    pub async fn bind(address: SocketAddr, close_first_after: Option<usize>) -> Self {
        let listener = TcpListener::bind(address).await.unwrap();
        let address = listener.local_addr().unwrap();
        let (tx, frames) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let limit = if connection == 0 { close_first_after } else { None };
                tokio::spawn(read_frames(stream, connection, limit, tx.clone()));
                connection += 1;
            }
        });

        Self {
            address,
            frames,
            accept_task,
        }
    }

    /// Wait for the next frame, failing the test after five seconds
    pub async fn next_frame(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("collector stopped")
    }

    /// Frame already received, if any
    pub fn try_frame(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    /// Wait `quiet` and return everything that arrived
    pub async fn collect_for(&mut self, quiet: Duration) -> Vec<Frame> {
        tokio::time::sleep(quiet).await;
        let mut frames = Vec::new();
        while let Some(frame) = self.try_frame() {
            frames.push(frame);
        }
        frames
    }
}

impl Drop for TestCollector {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn read_frames(
    mut stream: TcpStream,
    connection: usize,
    limit: Option<usize>,
    tx: mpsc::UnboundedSender<Frame>,
) {
    let mut count = 0;
    loop {
        if limit.is_some_and(|limit| count >= limit) {
            return;
        }
        let Ok(command) = stream.read_u8().await else {
            return;
        };
        let Ok(len) = stream.read_i32().await else {
            return;
        };
        let mut payload = vec![0; len as usize];
        if stream.read_exact(&mut payload).await.is_err() {
            return;
        }
        count += 1;
        if tx
            .send(Frame {
                connection,
                command,
                payload,
            })
            .is_err()
        {
            return;
        }
    }
}

/// An address with nothing listening on it
pub async fn reserve_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
