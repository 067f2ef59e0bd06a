//! Message broker seam used by the relay.

#[cfg(feature = "emitter")]
mod emitter;
mod in_memory;
mod log_broker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PublishError;
use crate::message::AnyMessage;

#[cfg(feature = "emitter")]
pub use emitter::EmitterBroker;
pub use in_memory::{InMemoryBroker, PublishedMessage};
pub use log_broker::{LogBroker, LogBrokerError};

/// One outbox row on its way to the broker.
///
/// `event_type` and `payload` are the stored wire form; `message` is the
/// payload decoded through the type registry, for in-process consumers.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub id: Uuid,
    pub event_type: &'a str,
    pub payload: &'a [u8],
    pub message: &'a dyn AnyMessage,
    pub metadata: &'a HashMap<String, String>,
    pub occurred_on: SystemTime,
    /// 1 on the first try.
    pub attempt: u32,
}

/// Publishes deliveries to an external system.
///
/// Returning `Ok` is the acknowledgment: the relay marks the row processed
/// only after it. A broker may see the same `id` more than once.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, delivery: &Delivery<'_>) -> Result<(), PublishError>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn publish(&self, delivery: &Delivery<'_>) -> Result<(), PublishError> {
        (**self).publish(delivery).await
    }
}
