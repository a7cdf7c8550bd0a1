//! Continuation queue for the reconciliation sweep.
//!
//! Each message carries the cursor of the next page. The in-process channel
//! moves serialized JSON bodies, the same shape an external broker would
//! deliver, and the consumer side insists on batches of exactly one message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_storage::ContinuationToken;
use thiserror::Error;
use tokio::sync::mpsc;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("queue is full")]
    Full,

    #[error("expected a batch of exactly one message, got {0}")]
    BatchShape(usize),

    #[error("malformed queue message: {0}")]
    Malformed(String),
}

/// Message asking for the next sweep page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepMessage {
    /// Base64 continuation token.
    pub cursor: String,
}

impl SweepMessage {
    pub fn from_token(token: &ContinuationToken) -> Self {
        Self {
            cursor: token.to_base64(),
        }
    }

    pub fn token(&self) -> Result<ContinuationToken, QueueError> {
        ContinuationToken::from_base64(&self.cursor)
            .map_err(|e| QueueError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    pub fn decode(body: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(body).map_err(|e| QueueError::Malformed(e.to_string()))
    }
}

/// Producer side of the continuation queue.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    async fn send(&self, message: SweepMessage) -> Result<(), QueueError>;
}

/// In-process queue backed by a bounded tokio channel.
#[derive(Clone, Debug)]
pub struct ChannelQueue {
    tx: mpsc::Sender<Vec<u8>>,
}

/// Consumer side of [`ChannelQueue`].
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
    batch_size: usize,
}

/// Create a queue holding up to `capacity` messages, delivered in batches of
/// up to `batch_size`.
pub fn channel(capacity: usize, batch_size: usize) -> (ChannelQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelQueue { tx },
        QueueReceiver {
            rx,
            batch_size: batch_size.max(1),
        },
    )
}

#[async_trait]
impl WorkQueue for ChannelQueue {
    /// Never waits for capacity: the sweep runs on the consumer task, so
    /// blocking here on a full queue could never be relieved.
    async fn send(&self, message: SweepMessage) -> Result<(), QueueError> {
        let body = message.encode()?;
        self.tx.try_send(body).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

impl QueueReceiver {
    /// Wait for the next batch. `None` once every sender is gone.
    pub async fn recv_batch(&mut self) -> Option<Vec<Vec<u8>>> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let received = self.rx.recv_many(&mut batch, self.batch_size).await;
        (received > 0).then_some(batch)
    }
}

/// Decode a delivered batch, which must hold exactly one message.
pub fn decode_batch(batch: &[Vec<u8>]) -> Result<SweepMessage, QueueError> {
    match batch {
        [body] => SweepMessage::decode(body),
        other => Err(QueueError::BatchShape(other.len())),
    }
}
