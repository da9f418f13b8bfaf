//! Concurrent delivery fan-out with eviction on confirmed receipt

use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use alerts_core::{ConditionBlock, ConditionKey, DeliveryConfig, DeliveryError};
use alerts_price_feed::SubscriptionStore;
use crate::builder::NotificationBuilder;
use crate::submitter::NotificationSubmitter;

/// What happened to one fired condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// 202 received; `evicted` is false when the key had already gone or was re-subscribed
    Delivered { attempts: u32, evicted: bool },
    /// No 202 within the retry bound; the condition stays and may refire
    Exhausted { attempts: u32 },
    Cancelled,
    /// A delivery for the same key is still running
    Skipped,
    /// Non-retryable failure, e.g. no route for an opaque id; the condition stays
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub key: ConditionKey,
    pub status: DeliveryStatus,
}

/// Deliveries spawned for one cycle
#[derive(Debug, Default)]
pub struct DispatchBatch {
    handles: Vec<JoinHandle<DeliveryOutcome>>,
    skipped: Vec<ConditionKey>,
}

impl DispatchBatch {
    /// Number of deliveries actually started
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn skipped(&self) -> &[ConditionKey] {
        &self.skipped
    }

    /// Wait for every delivery of the batch
    pub async fn join(self) -> Vec<DeliveryOutcome> {
        let mut outcomes: Vec<DeliveryOutcome> = self
            .skipped
            .into_iter()
            .map(|key| DeliveryOutcome {
                key,
                status: DeliveryStatus::Skipped,
            })
            .collect();

        for joined in futures::future::join_all(self.handles).await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Delivery task failed: {}", e),
            }
        }

        outcomes
    }
}

/// Removes the key from the in-flight set when the delivery task ends
struct InFlightGuard {
    in_flight: Arc<DashSet<ConditionKey>>,
    key: ConditionKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Fans fired conditions out to bounded concurrent delivery tasks
pub struct DeliveryDispatcher {
    builder: NotificationBuilder,
    submitter: Arc<NotificationSubmitter>,
    store: Arc<SubscriptionStore>,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<ConditionKey>>,
}

impl DeliveryDispatcher {
    pub fn new(
        builder: NotificationBuilder,
        submitter: NotificationSubmitter,
        store: Arc<SubscriptionStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            builder,
            submitter: Arc::new(submitter),
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn from_config(
        config: &DeliveryConfig,
        store: Arc<SubscriptionStore>,
    ) -> Result<Self, DeliveryError> {
        Ok(Self::new(
            NotificationBuilder::new(config.default_callback_url.clone()),
            NotificationSubmitter::new(config.into())?,
            store,
            config.max_concurrent,
        ))
    }

    /// Deliveries currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Spawn one delivery task per fired condition. Must be called within a tokio runtime.
    pub fn dispatch(
        &self,
        fired: Vec<ConditionBlock>,
        shutdown: &watch::Receiver<bool>,
    ) -> DispatchBatch {
        let mut batch = DispatchBatch::default();

        for block in fired {
            let key = block.key();
            if !self.in_flight.insert(key.clone()) {
                debug!("Delivery for {} still running, skipping", key);
                batch.skipped.push(key);
                continue;
            }

            let guard = InFlightGuard {
                in_flight: Arc::clone(&self.in_flight),
                key,
            };
            let builder = self.builder.clone();
            let submitter = Arc::clone(&self.submitter);
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&self.permits);
            let shutdown = shutdown.clone();

            batch.handles.push(tokio::spawn(async move {
                let status = deliver(block, &builder, &submitter, &store, &permits, shutdown).await;
                DeliveryOutcome {
                    key: guard.key.clone(),
                    status,
                }
            }));
        }

        batch
    }
}

async fn deliver(
    block: ConditionBlock,
    builder: &NotificationBuilder,
    submitter: &NotificationSubmitter,
    store: &SubscriptionStore,
    permits: &Semaphore,
    mut shutdown: watch::Receiver<bool>,
) -> DeliveryStatus {
    let key = block.key();

    let request = match builder.build(&block) {
        Ok(request) => request,
        Err(e) => {
            error!("Cannot deliver {}: {}", key, e);
            return DeliveryStatus::Failed(e.to_string());
        }
    };

    let Ok(_permit) = permits.acquire().await else {
        return DeliveryStatus::Cancelled;
    };

    match submitter.submit(&request, &mut shutdown).await {
        Ok(attempts) => {
            let same_condition = |stored: &ConditionBlock| {
                stored.threshold_price == block.threshold_price && stored.operator == block.operator
            };
            let evicted = match store.delete_if(&key, same_condition) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Delivered but did not evict: {}", e);
                    false
                }
            };
            DeliveryStatus::Delivered { attempts, evicted }
        }
        Err(DeliveryError::Exhausted { attempts }) => {
            error!(
                "Giving up on {} after {} attempts; condition stays active",
                key, attempts
            );
            DeliveryStatus::Exhausted { attempts }
        }
        Err(DeliveryError::Cancelled { attempts }) => {
            info!("Delivery of {} cancelled after {} attempts", key, attempts);
            DeliveryStatus::Cancelled
        }
        Err(e) => {
            error!("Delivery of {} failed: {}", key, e);
            DeliveryStatus::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submitter::SubmitterConfig;
    use alerts_core::{shutdown_channel, Notification, Operator};
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    struct Callback {
        status: StatusCode,
        received: Arc<Mutex<Vec<Notification>>>,
    }

    async fn handle(State(cb): State<Callback>, Json(body): Json<Notification>) -> StatusCode {
        cb.received.lock().push(body);
        cb.status
    }

    async fn serve(status: StatusCode) -> (String, Arc<Mutex<Vec<Notification>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = Callback {
            status,
            received: Arc::clone(&received),
        };
        let app = Router::new().route("/hook", post(handle)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/hook"), received)
    }

    fn dispatcher(store: Arc<SubscriptionStore>, default_callback: Option<String>) -> DeliveryDispatcher {
        DeliveryDispatcher::new(
            NotificationBuilder::new(default_callback),
            NotificationSubmitter::new(SubmitterConfig {
                max_attempts: 4,
                retry_delay: Duration::from_millis(10),
                request_timeout: Duration::from_secs(2),
            })
            .unwrap(),
            store,
            4,
        )
    }

    fn stored(store: &SubscriptionStore, dest: &str) -> ConditionBlock {
        let block = ConditionBlock::new("BTC", "USD", "42000", Operator::Ge, dest);
        store.set(block.clone());
        block.with_current_price("42010.5")
    }

    #[tokio::test]
    async fn test_accepted_delivery_evicts() {
        let (url, received) = serve(StatusCode::ACCEPTED).await;
        let store = Arc::new(SubscriptionStore::new());
        let fired = stored(&store, &url);
        let (_tx, shutdown) = shutdown_channel();

        let outcomes = dispatcher(Arc::clone(&store), None)
            .dispatch(vec![fired.clone()], &shutdown)
            .join()
            .await;

        assert_eq!(
            outcomes,
            vec![DeliveryOutcome {
                key: fired.key(),
                status: DeliveryStatus::Delivered { attempts: 1, evicted: true },
            }]
        );
        assert!(!store.contains(&fired.key()));
        assert_eq!(received.lock()[0].values.current_price, "42010.5");
    }

    #[tokio::test]
    async fn test_exhausted_delivery_keeps_condition() {
        let (url, received) = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let store = Arc::new(SubscriptionStore::new());
        let fired = stored(&store, &url);
        let (_tx, shutdown) = shutdown_channel();

        let outcomes = dispatcher(Arc::clone(&store), None)
            .dispatch(vec![fired.clone()], &shutdown)
            .join()
            .await;

        assert_eq!(outcomes[0].status, DeliveryStatus::Exhausted { attempts: 4 });
        assert_eq!(received.lock().len(), 4);
        assert!(store.contains(&fired.key()));
    }

    #[tokio::test]
    async fn test_opaque_destination_uses_default_callback() {
        let (url, received) = serve(StatusCode::ACCEPTED).await;
        let store = Arc::new(SubscriptionStore::new());
        let fired = stored(&store, "123456789");
        let (_tx, shutdown) = shutdown_channel();

        let outcomes = dispatcher(Arc::clone(&store), Some(url))
            .dispatch(vec![fired], &shutdown)
            .join()
            .await;

        assert!(matches!(outcomes[0].status, DeliveryStatus::Delivered { .. }));
        assert_eq!(received.lock()[0].url, "123456789");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_no_route_fails_without_eviction() {
        let store = Arc::new(SubscriptionStore::new());
        let fired = stored(&store, "123456789");
        let (_tx, shutdown) = shutdown_channel();

        let outcomes = dispatcher(Arc::clone(&store), None)
            .dispatch(vec![fired], &shutdown)
            .join()
            .await;

        assert!(matches!(outcomes[0].status, DeliveryStatus::Failed(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_raced_away_entry_is_tolerated() {
        let (url, _received) = serve(StatusCode::ACCEPTED).await;
        let store = Arc::new(SubscriptionStore::new());
        let fired = stored(&store, &url);
        store.delete(&fired.key()).unwrap();
        let (_tx, shutdown) = shutdown_channel();

        let outcomes = dispatcher(Arc::clone(&store), None)
            .dispatch(vec![fired], &shutdown)
            .join()
            .await;

        assert_eq!(
            outcomes[0].status,
            DeliveryStatus::Delivered { attempts: 1, evicted: false }
        );
    }

    #[tokio::test]
    async fn test_resubscribed_condition_survives_delivery() {
        let (url, _received) = serve(StatusCode::ACCEPTED).await;
        let store = Arc::new(SubscriptionStore::new());
        let fired = stored(&store, &url);
        // Same triple, new threshold, stored while the old one was firing
        store.set(ConditionBlock::new("BTC", "USD", "45000", Operator::Ge, url.as_str()));
        let (_tx, shutdown) = shutdown_channel();

        let outcomes = dispatcher(Arc::clone(&store), None)
            .dispatch(vec![fired.clone()], &shutdown)
            .join()
            .await;

        assert_eq!(
            outcomes[0].status,
            DeliveryStatus::Delivered { attempts: 1, evicted: false }
        );
        assert_eq!(store.get(&fired.key()).unwrap().threshold_price, "45000");
    }

    #[tokio::test]
    async fn test_in_flight_key_is_skipped() {
        let store = Arc::new(SubscriptionStore::new());
        // Unroutable and slow: keep the first delivery busy retrying
        let fired = stored(&store, "http://127.0.0.1:9/hook");
        let dispatcher = DeliveryDispatcher::new(
            NotificationBuilder::default(),
            NotificationSubmitter::new(SubmitterConfig {
                max_attempts: 2,
                retry_delay: Duration::from_millis(300),
                request_timeout: Duration::from_secs(1),
            })
            .unwrap(),
            Arc::clone(&store),
            4,
        );
        let (_tx, shutdown) = shutdown_channel();

        let first = dispatcher.dispatch(vec![fired.clone()], &shutdown);
        let second = dispatcher.dispatch(vec![fired.clone()], &shutdown);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(second.skipped(), &[fired.key()]);

        first.join().await;
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(store.contains(&fired.key()));
    }
}
