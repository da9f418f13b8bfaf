//! Notification builder - payload and endpoint for a fired condition

use alerts_core::{
    ConditionBlock, ConditionKey, DeliveryError, DeliveryResult, Destination, Notification,
};

/// Notification ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub key: ConditionKey,
    pub endpoint: String,
    pub notification: Notification,
}

/// Resolves destinations and builds payloads
#[derive(Debug, Clone, Default)]
pub struct NotificationBuilder {
    default_callback_url: Option<String>,
}

impl NotificationBuilder {
    pub fn new(default_callback_url: Option<String>) -> Self {
        Self {
            default_callback_url,
        }
    }

    /// Where a destination's notification is POSTed.
    ///
    /// Direct URLs receive it themselves; opaque ids go through the default
    /// callback, which reads the id back from the payload's `url` field.
    pub fn resolve_endpoint(&self, destination: &Destination) -> DeliveryResult<String> {
        match destination {
            Destination::DirectUrl(url) => Ok(url.clone()),
            Destination::OpaqueId(id) => self
                .default_callback_url
                .clone()
                .ok_or_else(|| DeliveryError::NoRoute(id.clone())),
        }
    }

    pub fn build(&self, fired: &ConditionBlock) -> DeliveryResult<DeliveryRequest> {
        Ok(DeliveryRequest {
            key: fired.key(),
            endpoint: self.resolve_endpoint(&fired.destination)?,
            notification: Notification::from_fired(fired),
        })
    }
}
