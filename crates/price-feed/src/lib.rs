//! Subscription store and price polling
//!
//! Features:
//! - Concurrent condition store keyed by (token, fiat, destination)
//! - Batched price API client
//! - Fixed-interval poller with cooperative shutdown

pub mod feeds;
pub mod poller;
pub mod state;

pub use feeds::{FeedConfig, PriceApiClient, RateSource};
pub use poller::{PollerConfig, RatePoller};
pub use state::{StoreSnapshot, StoreStats, SubscriptionStore};
