//! Rate snapshot x store snapshot evaluation

use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::debug;

use alerts_core::{
    parse_decimal, ConditionBlock, FiatRates, MatchError, MatchResult, RateSnapshot,
};
use alerts_price_feed::StoreSnapshot;

/// Matcher configuration
#[derive(Debug, Clone, Default)]
pub struct MatcherConfig {
    /// Evaluate fiat groups on the rayon pool
    pub parallel: bool,
}

/// Outcome of one match pass
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    /// Copies of the fired conditions, `current_price` stamped
    pub fired: Vec<ConditionBlock>,
    pub evaluated: usize,
    pub duration: Duration,
}

impl MatchReport {
    /// Nothing to deliver this cycle
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

/// Evaluates stored conditions against live rates
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Evaluate every condition stored for every quoted (token, fiat).
    ///
    /// Any unparseable rate or threshold aborts the whole pass.
    pub fn match_rates(
        &self,
        rates: &RateSnapshot,
        store: &StoreSnapshot,
    ) -> MatchResult<MatchReport> {
        let start = Instant::now();

        let groups: Vec<(Vec<ConditionBlock>, usize)> = if self.config.parallel {
            rates
                .quotes
                .par_iter()
                .map(|quote| match_fiat(quote, store))
                .collect::<MatchResult<_>>()?
        } else {
            rates
                .quotes
                .iter()
                .map(|quote| match_fiat(quote, store))
                .collect::<MatchResult<_>>()?
        };

        let mut report = MatchReport::default();
        for (fired, evaluated) in groups {
            report.fired.extend(fired);
            report.evaluated += evaluated;
        }
        report.duration = start.elapsed();

        debug!(
            "Evaluated {} conditions against {} rates, {} fired in {:?}",
            report.evaluated,
            rates.rate_count(),
            report.fired.len(),
            report.duration
        );

        Ok(report)
    }
}

fn match_fiat(
    quote: &FiatRates,
    store: &StoreSnapshot,
) -> MatchResult<(Vec<ConditionBlock>, usize)> {
    let mut fired = Vec::new();
    let mut evaluated = 0;

    for (token, rate_text) in &quote.rates {
        let candidates = store.conditions_for(token, &quote.fiat);
        if candidates.is_empty() {
            continue;
        }

        let rate = parse_decimal(rate_text).ok_or_else(|| MatchError::InvalidRate {
            token: token.clone(),
            fiat: quote.fiat.clone(),
            value: rate_text.clone(),
        })?;

        for condition in candidates {
            let threshold = condition
                .threshold()
                .ok_or_else(|| MatchError::InvalidThreshold {
                    key: condition.key(),
                    value: condition.threshold_price.clone(),
                })?;

            evaluated += 1;
            if condition.operator.holds(rate, threshold) {
                fired.push(condition.with_current_price(rate_text.trim().trim_matches('"')));
            }
        }
    }

    Ok((fired, evaluated))
}
