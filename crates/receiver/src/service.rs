//! Receiver service - wires the store, ingestor, poller, pipeline and HTTP surface

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use alerts_core::{shutdown_channel, ReceiverConfig};
use alerts_delivery::DeliveryDispatcher;
use alerts_matcher::{Matcher, MatcherConfig};
use alerts_price_feed::{FeedConfig, PriceApiClient, PollerConfig, RatePoller, RateSource, SubscriptionStore};

use crate::ingestor::SubscriptionIngestor;
use crate::pipeline::AlertPipeline;
use crate::queue::{memory_queue, QueueConsumer, QueuePublisher};
use crate::server::{self, AppState};

/// Snapshots waiting between poller and pipeline
const SNAPSHOT_BUFFER: usize = 4;

/// The running receiver
pub struct ReceiverService {
    config: ReceiverConfig,
    store: Arc<SubscriptionStore>,
    source: Arc<dyn RateSource>,
    publisher: QueuePublisher,
    consumer: Option<QueueConsumer>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ReceiverService {
    /// Build with the HTTP price API client
    pub fn new(config: ReceiverConfig) -> anyhow::Result<Self> {
        let client = PriceApiClient::new(FeedConfig {
            url: config.poll.price_api_url.clone(),
            request_timeout: config.poll.request_timeout(),
        })?;
        Self::with_source(config, Arc::new(client))
    }

    /// Build with any rate source
    pub fn with_source(config: ReceiverConfig, source: Arc<dyn RateSource>) -> anyhow::Result<Self> {
        config.validate()?;

        let (publisher, consumer) = memory_queue(config.queue.capacity);
        let (shutdown_tx, shutdown_rx) = shutdown_channel();

        Ok(Self {
            config,
            store: Arc::new(SubscriptionStore::new()),
            source,
            publisher,
            consumer: Some(consumer),
            shutdown_tx,
            shutdown_rx,
            handles: vec![],
        })
    }

    pub fn store(&self) -> Arc<SubscriptionStore> {
        Arc::clone(&self.store)
    }

    /// Publishing half of the subscription queue
    pub fn publisher(&self) -> QueuePublisher {
        self.publisher.clone()
    }

    /// Spawn every background task. The HTTP listener is bound here, so a
    /// bad address fails startup.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| anyhow::anyhow!("Receiver already started"))?;

        info!("Starting receiver");

        let ingestor = SubscriptionIngestor::new(Arc::clone(&self.store));
        let shutdown = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            ingestor.run(consumer, shutdown).await;
        }));

        let (snapshots_tx, snapshots_rx) = mpsc::channel(SNAPSHOT_BUFFER);

        let poller = RatePoller::new(
            PollerConfig::from(&self.config.poll),
            Arc::clone(&self.store),
            Arc::clone(&self.source),
        );
        let shutdown = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            poller.run(snapshots_tx, shutdown).await;
        }));

        let dispatcher = DeliveryDispatcher::from_config(&self.config.delivery, Arc::clone(&self.store))?;
        let matcher = Matcher::new(MatcherConfig {
            parallel: self.config.poll.parallel_match,
        });
        let pipeline = AlertPipeline::new(Arc::clone(&self.store), matcher, dispatcher);
        let shutdown = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            pipeline.run(snapshots_rx, shutdown).await;
        }));

        if self.config.http.enabled {
            let listener = TcpListener::bind(self.config.http.address()).await?;
            let router = server::create_router(
                AppState {
                    store: Arc::clone(&self.store),
                    publisher: self.publisher.clone(),
                },
                self.config.http.request_timeout(),
            );
            let shutdown = self.shutdown_rx.clone();
            self.handles.push(tokio::spawn(async move {
                if let Err(e) = server::serve(listener, router, shutdown).await {
                    error!("HTTP server error: {}", e);
                }
            }));
        }

        info!("Receiver started with {} tasks", self.handles.len());
        Ok(())
    }

    /// Signal every task and wait for them to stop
    pub async fn shutdown(&mut self) {
        info!("Stopping receiver");
        let _ = self.shutdown_tx.send(true);

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Receiver task failed: {}", e);
            }
        }

        info!("Receiver stopped ({} conditions still active)", self.store.len());
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && !*self.shutdown_rx.borrow()
    }
}
