//! Rate alerts receiver
//!
//! Accepts subscriptions from the queue and HTTP, polls the price API,
//! matches rates against stored conditions and delivers notifications.

pub mod ingestor;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod service;
pub mod settings;

pub use ingestor::{IngestError, SubscriptionIngestor};
pub use pipeline::{AlertPipeline, CycleReport};
pub use queue::{memory_queue, QueueConsumer, QueueError, QueuePublisher, StreamSource, SubscriptionSource};
pub use server::{create_router, AppState};
pub use service::ReceiverService;
