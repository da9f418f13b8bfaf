//! Notification submission with fixed-interval retries

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use alerts_core::{cancelled, is_cancelled, DeliveryConfig, DeliveryError, DeliveryResult};
use crate::builder::DeliveryRequest;

/// The only status that confirms receipt
pub const ACCEPTED: u16 = 202;

/// Submission configuration
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retry_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&DeliveryConfig> for SubmitterConfig {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// POSTs notifications until a destination answers 202
pub struct NotificationSubmitter {
    config: SubmitterConfig,
    client: reqwest::Client,
}

impl NotificationSubmitter {
    pub fn new(config: SubmitterConfig) -> DeliveryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Deliver with up to `max_attempts` tries spaced by `retry_delay`.
    ///
    /// Returns the number of attempts it took. Shutdown is honoured between
    /// attempts; a request already on the wire is left to finish.
    pub async fn submit(
        &self,
        request: &DeliveryRequest,
        shutdown: &mut watch::Receiver<bool>,
    ) -> DeliveryResult<u32> {
        let mut ticker = tokio::time::interval(self.config.retry_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick completes immediately
        ticker.tick().await;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancelled(shutdown) => {
                        return Err(DeliveryError::Cancelled { attempts: attempt - 1 });
                    }
                }
            }
            if is_cancelled(shutdown) {
                return Err(DeliveryError::Cancelled { attempts: attempt - 1 });
            }

            match self.attempt(request).await {
                Ok(()) => {
                    info!(
                        "Delivered {} to {} on attempt {}",
                        request.key, request.endpoint, attempt
                    );
                    return Ok(attempt);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Delivery of {} failed (attempt {}/{}): {}",
                        request.key, attempt, self.config.max_attempts, e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(DeliveryError::Exhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// One POST; only 202 counts as delivered
    async fn attempt(&self, request: &DeliveryRequest) -> DeliveryResult<()> {
        let response = self
            .client
            .post(&request.endpoint)
            .json(&request.notification)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        debug!("{} answered {} for {}", request.endpoint, status, request.key);

        if status == ACCEPTED {
            Ok(())
        } else {
            Err(DeliveryError::UnexpectedStatus(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NotificationBuilder;
    use alerts_core::{shutdown_channel, ConditionBlock, Notification, Operator};
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Callback double answering with `statuses[n]` on the n-th call, then the last one
    #[derive(Clone)]
    struct Callback {
        calls: Arc<AtomicU32>,
        statuses: Arc<Vec<StatusCode>>,
    }

    async fn handle(State(cb): State<Callback>, Json(_body): Json<Notification>) -> StatusCode {
        let n = cb.calls.fetch_add(1, Ordering::SeqCst) as usize;
        cb.statuses[n.min(cb.statuses.len() - 1)]
    }

    async fn serve(statuses: Vec<StatusCode>) -> (String, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let state = Callback {
            calls: Arc::clone(&calls),
            statuses: Arc::new(statuses),
        };
        let app = Router::new().route("/cb", post(handle)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/cb"), calls)
    }

    fn submitter(max_attempts: u32) -> NotificationSubmitter {
        NotificationSubmitter::new(SubmitterConfig {
            max_attempts,
            retry_delay: Duration::from_millis(20),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    fn request(url: &str) -> DeliveryRequest {
        let fired = ConditionBlock::new("BTC", "USD", "1", Operator::Gt, url).with_current_price("2");
        NotificationBuilder::default().build(&fired).unwrap()
    }

    #[tokio::test]
    async fn test_202_on_first_attempt() {
        let (url, calls) = serve(vec![StatusCode::ACCEPTED]).await;
        let (_tx, mut shutdown) = shutdown_channel();

        let attempts = submitter(4).submit(&request(&url), &mut shutdown).await.unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_202() {
        let (url, calls) = serve(vec![
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::OK,
            StatusCode::ACCEPTED,
        ])
        .await;
        let (_tx, mut shutdown) = shutdown_channel();

        let attempts = submitter(4).submit(&request(&url), &mut shutdown).await.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let (url, calls) = serve(vec![StatusCode::OK]).await;
        let (_tx, mut shutdown) = shutdown_channel();

        let err = submitter(4).submit(&request(&url), &mut shutdown).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Exhausted { attempts: 4 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        // Nothing listens on port 9 of localhost
        let (_tx, mut shutdown) = shutdown_channel();
        let err = submitter(2)
            .submit(&request("http://127.0.0.1:9/cb"), &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Exhausted { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_shutdown_stops_between_attempts() {
        let (url, calls) = serve(vec![StatusCode::SERVICE_UNAVAILABLE]).await;
        let (tx, mut shutdown) = shutdown_channel();
        let submitter = NotificationSubmitter::new(SubmitterConfig {
            max_attempts: 4,
            retry_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();

        let req = request(&url);
        let task = tokio::spawn(async move { submitter.submit(&req, &mut shutdown).await });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, DeliveryError::Cancelled { attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
