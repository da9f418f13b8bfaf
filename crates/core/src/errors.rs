//! Error types

use thiserror::Error;

use crate::ConditionKey;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Subscription store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Condition not found: {0}")]
    NotFound(ConditionKey),

    #[error("Condition was replaced: {0}")]
    Replaced(ConditionKey),
}

/// Rejected subscription or removal messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unknown condition operator: {0:?}")]
    UnknownOperator(String),

    #[error("Invalid threshold price: {0:?}")]
    InvalidPrice(String),
}

/// Price API errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Price API request failed: {0}")]
    Request(String),

    #[error("Price API returned status {0}")]
    Status(u16),

    #[error("Invalid price API response: {0}")]
    InvalidResponse(String),

    #[error("Timeout waiting for price API")]
    Timeout,
}

/// Match cycle errors; any of these aborts the whole cycle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Unparseable rate {value:?} for {token}/{fiat}")]
    InvalidRate {
        token: String,
        fiat: String,
        value: String,
    },

    #[error("Unparseable threshold {value:?} for {key}")]
    InvalidThreshold { key: ConditionKey, value: String },
}

/// Delivery errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {0}, expected 202")]
    UnexpectedStatus(u16),

    #[error("No callback route for opaque destination {0}")]
    NoRoute(String),

    #[error("No 202 after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Delivery cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl DeliveryError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Transport(_) | DeliveryError::UnexpectedStatus(_)
        )
    }
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type FeedResult<T> = Result<T, FeedError>;
pub type MatchResult<T> = Result<T, MatchError>;
pub type DeliveryResult<T> = Result<T, DeliveryError>;
