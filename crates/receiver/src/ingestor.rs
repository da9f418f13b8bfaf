//! Subscription ingestor - queue messages into the store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use alerts_core::{cancelled, ConditionBlock, ConditionKey, SubscriptionError, SubscriptionRequest};
use alerts_price_feed::SubscriptionStore;

use crate::queue::SubscriptionSource;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// Writes every valid subscription message into the store
pub struct SubscriptionIngestor {
    store: Arc<SubscriptionStore>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl SubscriptionIngestor {
    pub fn new(store: Arc<SubscriptionStore>) -> Self {
        Self {
            store,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Decode, validate and store one message
    pub fn ingest(&self, payload: &[u8]) -> Result<ConditionKey, IngestError> {
        let result = SubscriptionRequest::from_slice(payload).and_then(ConditionBlock::try_from);

        match result {
            Ok(block) => {
                let key = block.key();
                self.store.set(block);
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(key)
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    /// Consume until the source closes or shutdown is signalled.
    /// Bad messages are logged and dropped.
    pub async fn run<S: SubscriptionSource>(
        &self,
        mut source: S,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting subscription ingestor");

        loop {
            tokio::select! {
                message = source.next_message() => {
                    let Some(payload) = message else {
                        info!("Subscription source closed");
                        break;
                    };

                    match self.ingest(&payload) {
                        Ok(key) => debug!("Subscribed {}", key),
                        Err(e) => warn!(
                            "Dropping subscription message: {} ({})",
                            e,
                            String::from_utf8_lossy(&payload)
                        ),
                    }
                }
                _ = cancelled(&mut shutdown) => {
                    info!("Subscription ingestor shutdown requested");
                    break;
                }
            }
        }

        info!(
            "Subscription ingestor stopped ({} accepted, {} rejected)",
            self.accepted(),
            self.rejected()
        );
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
