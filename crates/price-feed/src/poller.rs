//! Periodic rate poller - derives the subscribed universe and fetches rates

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use alerts_core::{cancelled, is_cancelled, PollConfig, RateSnapshot, RatesRequest};
use crate::feeds::RateSource;
use crate::state::SubscriptionStore;

/// Poller configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub provider: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            provider: "cmc".to_string(),
        }
    }
}

impl From<&PollConfig> for PollerConfig {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: config.interval(),
            provider: config.provider.clone(),
        }
    }
}

/// Fetches rates for every subscribed token/fiat on a fixed interval
pub struct RatePoller {
    config: PollerConfig,
    store: Arc<SubscriptionStore>,
    source: Arc<dyn RateSource>,
}

impl RatePoller {
    pub fn new(
        config: PollerConfig,
        store: Arc<SubscriptionStore>,
        source: Arc<dyn RateSource>,
    ) -> Self {
        Self { config, store, source }
    }

    /// Build the request for the current store contents.
    /// `None` when nothing is subscribed.
    pub fn build_request(&self) -> Option<RatesRequest> {
        let snapshot = self.store.snapshot();
        let request = RatesRequest::new(
            snapshot.tokens(),
            snapshot.fiats(),
            self.config.provider.clone(),
        );

        if request.is_empty() {
            None
        } else {
            Some(request)
        }
    }

    /// One poll cycle. Failures are logged and the cycle is skipped.
    pub async fn poll_once(&self) -> Option<RateSnapshot> {
        let Some(request) = self.build_request() else {
            debug!("No subscriptions, skipping price fetch");
            return None;
        };

        match self.source.fetch_rates(&request).await {
            Ok(snapshot) => {
                debug!(
                    "Fetched {} rates for {} tokens / {} currencies",
                    snapshot.rate_count(),
                    request.tokens.len(),
                    request.currencies.len()
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!("Price fetch failed, skipping cycle: {}", e);
                None
            }
        }
    }

    /// Run until shutdown, forwarding every fetched snapshot
    pub async fn run(
        &self,
        snapshots_tx: mpsc::Sender<RateSnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting rate poller every {:?}", self.config.interval);

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if is_cancelled(&shutdown) {
                        break;
                    }

                    let Some(snapshot) = self.poll_once().await else {
                        continue;
                    };

                    tokio::select! {
                        sent = snapshots_tx.send(snapshot) => {
                            if sent.is_err() {
                                debug!("Snapshot channel closed");
                                break;
                            }
                        }
                        _ = cancelled(&mut shutdown) => {
                            info!("Rate poller shutdown requested");
                            break;
                        }
                    }
                }
                _ = cancelled(&mut shutdown) => {
                    info!("Rate poller shutdown requested");
                    break;
                }
            }
        }

        info!("Rate poller stopped");
    }
}
