use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use outboxed::{Broker, Delivery, PublishError};

use super::orders::OrderCreated;

/// Keeps the decoded `OrderCreated` events it receives, acknowledging
/// everything else without looking at it.
#[derive(Clone, Default)]
pub struct OrderCreatedSink {
    pub received: Arc<Mutex<Vec<(OrderCreated, Option<String>)>>>,
}

impl OrderCreatedSink {
    pub fn received(&self) -> Vec<(OrderCreated, Option<String>)> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for OrderCreatedSink {
    async fn publish(&self, delivery: &Delivery<'_>) -> Result<(), PublishError> {
        if let Some(event) = delivery.message.downcast_ref::<OrderCreated>() {
            let correlation_id = delivery.metadata.get(outboxed::CORRELATION_ID).cloned();
            self.received
                .lock()
                .unwrap()
                .push((event.clone(), correlation_id));
        }
        Ok(())
    }
}

/// Crashes on every publish, taking the relay task down with it.
pub struct PanickingBroker;

#[async_trait]
impl Broker for PanickingBroker {
    async fn publish(&self, delivery: &Delivery<'_>) -> Result<(), PublishError> {
        panic!("broker driver crashed on {}", delivery.id);
    }
}
