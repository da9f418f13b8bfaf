//! Price API and notification payload types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ConditionBlock;

/// Batched request sent to the price API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatesRequest {
    pub tokens: Vec<String>,
    pub currencies: Vec<String>,
    pub api: String,
}

impl RatesRequest {
    pub fn new(
        tokens: BTreeSet<String>,
        currencies: BTreeSet<String>,
        api: impl Into<String>,
    ) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
            currencies: currencies.into_iter().collect(),
            api: api.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() || self.currencies.is_empty()
    }
}

/// Token rates quoted in one fiat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiatRates {
    pub fiat: String,
    /// token symbol -> rate text
    pub rates: BTreeMap<String, String>,
}

/// Result of one price fetch, in the order the API returned it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub quotes: Vec<FiatRates>,
}

impl RateSnapshot {
    pub fn new(quotes: Vec<FiatRates>) -> Self {
        Self { quotes }
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.iter().all(|q| q.rates.is_empty())
    }

    /// Total number of (fiat, token) rates
    pub fn rate_count(&self) -> usize {
        self.quotes.iter().map(|q| q.rates.len()).sum()
    }

    /// Look up one rate
    pub fn rate(&self, token: &str, fiat: &str) -> Option<&str> {
        self.quotes
            .iter()
            .filter(|q| q.fiat == fiat)
            .find_map(|q| q.rates.get(token))
            .map(String::as_str)
    }
}

/// Values block of a fired-condition notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationValues {
    pub currency: String,
    pub condition: String,
    pub fiat: String,
    pub price: String,
    pub current_price: String,
}

/// Payload POSTed to a destination when its condition fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub result: String,
    pub values: NotificationValues,
    pub url: String,
}

impl Notification {
    pub fn from_fired(block: &ConditionBlock) -> Self {
        Self {
            result: "true".to_string(),
            values: NotificationValues {
                currency: block.token.clone(),
                condition: block.operator.symbol().to_string(),
                fiat: block.fiat.clone(),
                price: block.threshold_price.clone(),
                current_price: block.current_price.clone().unwrap_or_default(),
            },
            url: block.destination.as_str().to_string(),
        }
    }
}
