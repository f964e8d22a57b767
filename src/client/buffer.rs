//! Drop-oldest buffer between the intake and delivery channels
//!
//! The buffer task never blocks on the network. It moves each incoming
//! message into the bounded delivery channel; when that channel is full it
//! pops the head of the delivery queue (the oldest undelivered record), hands
//! it to the drop hook, and retries once. Producers use the same eviction on
//! the bounded intake channel.

use super::{DropHook, Message};
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, trace};

/// Moves messages from the intake to the delivery channel
pub(crate) struct DropBuffer {
    intake: Receiver<Message>,
    delivery_tx: Sender<Message>,
    delivery_rx: Receiver<Message>,
    on_drop: DropHook,
}

impl DropBuffer {
    pub(crate) fn new(
        intake: Receiver<Message>,
        delivery_tx: Sender<Message>,
        delivery_rx: Receiver<Message>,
        on_drop: DropHook,
    ) -> Self {
        Self {
            intake,
            delivery_tx,
            delivery_rx,
            on_drop,
        }
    }

    /// Run until the intake is closed and drained. Returns the number of
    /// records dropped.
    pub(crate) async fn run(self) -> u64 {
        let mut dropped = 0u64;

        while let Ok(message) = self.intake.recv_async().await {
            match self.push(message) {
                Some(n) => dropped += n,
                None => break,
            }
        }

        debug!(dropped, "drop buffer stopped");
        dropped
    }

    /// Insert one message, evicting as needed. Returns the number of records
    /// dropped, or `None` once the delivery side is gone.
    pub(crate) fn push(&self, message: Message) -> Option<u64> {
        offer(&self.delivery_tx, &self.delivery_rx, message, &self.on_drop)
    }
}

/// Send `message` on a bounded channel without blocking. When the channel is
/// full its head is popped through `rx` and handed to `on_drop`, then the send
/// is retried once. Returns the number of records dropped, or `None` once
/// every receiver is gone.
pub(crate) fn offer(
    tx: &Sender<Message>,
    rx: &Receiver<Message>,
    message: Message,
    on_drop: &DropHook,
) -> Option<u64> {
    let message = match tx.try_send(message) {
        Ok(()) => return Some(0),
        Err(TrySendError::Disconnected(_)) => return None,
        Err(TrySendError::Full(message)) => message,
    };

    let mut dropped = 0;
    if let Ok(oldest) = rx.try_recv() {
        drop_message(oldest, on_drop);
        dropped += 1;
    }

    // A zero-capacity channel with no waiting receiver stays full; the
    // new record is dropped instead of retrying again.
    match tx.try_send(message) {
        Ok(()) => Some(dropped),
        Err(TrySendError::Full(message)) => {
            drop_message(message, on_drop);
            Some(dropped + 1)
        }
        Err(TrySendError::Disconnected(_)) => None,
    }
}

fn drop_message(message: Message, on_drop: &DropHook) {
    match message {
        Message::Log(record) => {
            trace!(category = record.category(), "dropping buffered record");
            on_drop(record);
        }
    }
}
