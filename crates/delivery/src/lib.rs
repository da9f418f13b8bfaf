//! Delivery of fired conditions to their destinations
//!
//! Features:
//! - Destination resolution (direct URL or default callback)
//! - 202-confirmed delivery with bounded fixed-interval retries
//! - Capped concurrent fan-out with eviction on success

pub mod builder;
pub mod dispatcher;
pub mod submitter;

pub use builder::{DeliveryRequest, NotificationBuilder};
pub use dispatcher::{DeliveryDispatcher, DeliveryOutcome, DeliveryStatus, DispatchBatch};
pub use submitter::{NotificationSubmitter, SubmitterConfig};
