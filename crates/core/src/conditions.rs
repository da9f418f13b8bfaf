//! Subscription conditions and their wire formats

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::{parse_decimal, Destination, Operator, SubscriptionError};

/// Store key: at most one condition exists per (token, fiat, destination)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConditionKey {
    pub token: String,
    pub fiat: String,
    pub destination: Destination,
}

impl ConditionKey {
    pub fn new(
        token: impl AsRef<str>,
        fiat: impl AsRef<str>,
        destination: impl Into<Destination>,
    ) -> Self {
        Self {
            token: normalize_symbol(token.as_ref()),
            fiat: normalize_symbol(fiat.as_ref()),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} -> {}", self.token, self.fiat, self.destination)
    }
}

/// One user subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionBlock {
    pub token: String,
    pub fiat: String,
    /// Kept as text; parsed when evaluated
    pub threshold_price: String,
    pub operator: Operator,
    pub destination: Destination,
    /// Live rate, stamped only on the copy handed to delivery
    pub current_price: Option<String>,
}

impl ConditionBlock {
    pub fn new(
        token: impl AsRef<str>,
        fiat: impl AsRef<str>,
        threshold_price: impl Into<String>,
        operator: Operator,
        destination: impl Into<Destination>,
    ) -> Self {
        Self {
            token: normalize_symbol(token.as_ref()),
            fiat: normalize_symbol(fiat.as_ref()),
            threshold_price: threshold_price.into(),
            operator,
            destination: destination.into(),
            current_price: None,
        }
    }

    pub fn key(&self) -> ConditionKey {
        ConditionKey {
            token: self.token.clone(),
            fiat: self.fiat.clone(),
            destination: self.destination.clone(),
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        parse_decimal(&self.threshold_price)
    }

    /// Copy of this condition annotated with the rate that fired it
    pub fn with_current_price(&self, rate: impl Into<String>) -> Self {
        Self {
            current_price: Some(rate.into()),
            ..self.clone()
        }
    }
}

/// Subscription message as published on the queue
///
/// `{ "currency": "BTC", "fiat": "USD", "price": "42000", "condition": ">=", "url": "..." }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "currency", alias = "token")]
    pub token: String,
    pub fiat: String,
    #[serde(deserialize_with = "text_or_number")]
    pub price: String,
    pub condition: String,
    #[serde(rename = "url", alias = "destination")]
    pub destination: String,
}

impl SubscriptionRequest {
    pub fn from_slice(payload: &[u8]) -> Result<Self, SubscriptionError> {
        serde_json::from_slice(payload).map_err(|e| SubscriptionError::Malformed(e.to_string()))
    }
}

impl TryFrom<SubscriptionRequest> for ConditionBlock {
    type Error = SubscriptionError;

    fn try_from(req: SubscriptionRequest) -> Result<Self, Self::Error> {
        let token = required("currency", &req.token)?;
        let fiat = required("fiat", &req.fiat)?;
        let destination = required("url", &req.destination)?;
        let operator: Operator = req.condition.parse()?;

        let threshold = req.price.trim().trim_matches('"').trim().to_string();
        if parse_decimal(&threshold).is_none() {
            return Err(SubscriptionError::InvalidPrice(req.price));
        }

        Ok(ConditionBlock::new(token, fiat, threshold, operator, destination))
    }
}

/// Explicit removal request, `{ "currency": .., "fiat": .., "url": .. }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalRequest {
    #[serde(rename = "currency", alias = "token")]
    pub token: String,
    pub fiat: String,
    #[serde(rename = "url", alias = "destination")]
    pub destination: String,
}

impl TryFrom<RemovalRequest> for ConditionKey {
    type Error = SubscriptionError;

    fn try_from(req: RemovalRequest) -> Result<Self, Self::Error> {
        let token = required("currency", &req.token)?;
        let fiat = required("fiat", &req.fiat)?;
        let destination = required("url", &req.destination)?;
        Ok(ConditionKey::new(token, fiat, destination))
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, SubscriptionError> {
    let value = value.trim();
    if value.is_empty() {
        Err(SubscriptionError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrNumber {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(s) => s,
        TextOrNumber::Number(n) => n.to_string(),
    })
}
