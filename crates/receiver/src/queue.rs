//! Subscription queue seam
//!
//! The broker itself lives outside this service. Anything that yields raw
//! subscription payloads can feed the ingestor through [`SubscriptionSource`];
//! [`memory_queue`] provides the in-process transport used by the HTTP surface.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

/// A stream of serialized subscription requests
#[async_trait::async_trait]
pub trait SubscriptionSource: Send {
    /// Next raw message; `None` once the queue is closed
    async fn next_message(&mut self) -> Option<Vec<u8>>;
}

/// Adapts any byte-payload stream into a subscription source
pub struct StreamSource<S> {
    inner: S,
}

impl<S> StreamSource<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl<S> SubscriptionSource for StreamSource<S>
where
    S: Stream<Item = Vec<u8>> + Unpin + Send,
{
    async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.inner.next().await
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Subscription queue is closed")]
    Closed,

    #[error("Subscription queue is full")]
    Full,
}

/// Publishing half of the in-process queue
#[derive(Debug, Clone)]
pub struct QueuePublisher {
    tx: mpsc::Sender<Vec<u8>>,
}

impl QueuePublisher {
    /// Publish, waiting for room when the queue is full
    pub async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.tx.send(payload).await.map_err(|_| QueueError::Closed)
    }

    /// Publish without waiting
    pub fn try_publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming half of the in-process queue
pub type QueueConsumer = StreamSource<ReceiverStream<Vec<u8>>>;

/// Bounded in-process subscription queue
pub fn memory_queue(capacity: usize) -> (QueuePublisher, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueuePublisher { tx },
        StreamSource::new(ReceiverStream::new(rx)),
    )
}
