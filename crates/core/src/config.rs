//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// Price polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub price_api_url: String,
    pub provider: String,
    pub request_timeout_ms: u64,
    pub parallel_match: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            price_api_url: "http://localhost:8090/prices".to_string(),
            provider: "cmc".to_string(),
            request_timeout_ms: 10_000,
            parallel_match: false,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub max_concurrent: usize,
    /// Bot webhook that resolves opaque destinations
    pub default_callback_url: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retry_delay_ms: 3_000,
            request_timeout_ms: 10_000,
            max_concurrent: 32,
            default_callback_url: None,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Whole-request deadline for the HTTP surface
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8085,
            request_timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Subscription queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1_024 }
    }
}

/// Complete receiver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub poll: PollConfig,
    pub delivery: DeliveryConfig,
    pub http: HttpConfig,
    pub queue: QueueConfig,
}

impl ReceiverConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.poll.interval_secs == 0 {
            return Err(CoreError::InvalidConfig("poll.interval_secs must be > 0".into()));
        }
        if self.poll.price_api_url.trim().is_empty() {
            return Err(CoreError::InvalidConfig("poll.price_api_url is empty".into()));
        }
        if self.delivery.max_attempts == 0 {
            return Err(CoreError::InvalidConfig("delivery.max_attempts must be > 0".into()));
        }
        if self.delivery.max_concurrent == 0 {
            return Err(CoreError::InvalidConfig("delivery.max_concurrent must be > 0".into()));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig("http.request_timeout_secs must be > 0".into()));
        }
        if self.queue.capacity == 0 {
            return Err(CoreError::InvalidConfig("queue.capacity must be > 0".into()));
        }
        if let Some(url) = &self.delivery.default_callback_url {
            if url.trim().is_empty() {
                return Err(CoreError::InvalidConfig(
                    "delivery.default_callback_url is empty".into(),
                ));
            }
        }
        Ok(())
    }
}
