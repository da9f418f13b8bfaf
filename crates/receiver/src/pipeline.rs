//! Poll cycle pipeline: rates -> match -> delivery

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use alerts_core::{cancelled, MatchError, RateSnapshot};
use alerts_delivery::{DeliveryDispatcher, DeliveryStatus, DispatchBatch};
use alerts_matcher::Matcher;
use alerts_price_feed::SubscriptionStore;

/// Summary of one match pass
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub evaluated: usize,
    pub fired: usize,
    pub dispatched: usize,
    pub skipped: usize,
}

/// Runs the matcher over each snapshot and hands fired conditions to delivery
pub struct AlertPipeline {
    store: Arc<SubscriptionStore>,
    matcher: Matcher,
    dispatcher: DeliveryDispatcher,
    cycles: AtomicU64,
}

impl AlertPipeline {
    pub fn new(store: Arc<SubscriptionStore>, matcher: Matcher, dispatcher: DeliveryDispatcher) -> Self {
        Self {
            store,
            matcher,
            dispatcher,
            cycles: AtomicU64::new(0),
        }
    }

    /// Match one snapshot against the current store and start deliveries.
    ///
    /// The returned batch runs on its own; awaiting it is optional.
    pub fn process(
        &self,
        rates: &RateSnapshot,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(CycleReport, DispatchBatch), MatchError> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let started_at = Utc::now();

        let snapshot = self.store.snapshot();
        let report = self.matcher.match_rates(rates, &snapshot)?;

        let fired = report.fired.len();
        let batch = if report.is_empty() {
            DispatchBatch::default()
        } else {
            self.dispatcher.dispatch(report.fired, shutdown)
        };

        Ok((
            CycleReport {
                cycle,
                started_at,
                evaluated: report.evaluated,
                fired,
                dispatched: batch.len(),
                skipped: batch.skipped().len(),
            },
            batch,
        ))
    }

    /// Consume snapshots until the poller stops or shutdown is signalled.
    ///
    /// Returns only after every delivery it started has finished, so a 202
    /// arriving during shutdown still evicts its condition.
    pub async fn run(
        &self,
        mut snapshots_rx: mpsc::Receiver<RateSnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting alert pipeline");
        let mut batches = JoinSet::new();

        loop {
            let rates = tokio::select! {
                rates = snapshots_rx.recv() => match rates {
                    Some(rates) => rates,
                    None => break,
                },
                Some(_) = batches.join_next(), if !batches.is_empty() => continue,
                _ = cancelled(&mut shutdown) => {
                    info!("Alert pipeline shutdown requested");
                    break;
                }
            };

            match self.process(&rates, &shutdown) {
                Ok((report, batch)) if batch.is_empty() => {
                    debug!(
                        "Cycle {}: {} evaluated, nothing to deliver",
                        report.cycle, report.evaluated
                    );
                }
                Ok((report, batch)) => {
                    info!(
                        "Cycle {}: {} fired, {} dispatched, {} already in flight",
                        report.cycle, report.fired, report.dispatched, report.skipped
                    );
                    batches.spawn(log_batch(report.cycle, batch));
                }
                Err(e) => error!("Match cycle aborted: {}", e),
            }
        }

        if !batches.is_empty() {
            info!("Waiting for {} delivery batches to finish", batches.len());
        }
        while let Some(joined) = batches.join_next().await {
            if let Err(e) = joined {
                error!("Delivery batch task failed: {}", e);
            }
        }

        info!("Alert pipeline stopped");
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }
}

async fn log_batch(cycle: u64, batch: DispatchBatch) {
    let outcomes = batch.join().await;
    let delivered = outcomes
        .iter()
        .filter(|o| matches!(o.status, DeliveryStatus::Delivered { .. }))
        .count();
    let exhausted = outcomes
        .iter()
        .filter(|o| matches!(o.status, DeliveryStatus::Exhausted { .. }))
        .count();

    info!(
        "Cycle {} deliveries done: {} delivered, {} exhausted, {} total",
        cycle,
        delivered,
        exhausted,
        outcomes.len()
    );
}
