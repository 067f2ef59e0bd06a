use std::sync::Mutex;

use async_trait::async_trait;
use event_emitter_rs::EventEmitter;

use super::{Broker, Delivery};
use crate::error::PublishError;

/// Broker that emits each delivery to in-process `EventEmitter` listeners,
/// keyed by `event_type`. The payload is passed as a (lossy) UTF-8 string.
///
/// Requires the `emitter` feature.
pub struct EmitterBroker {
    emitter: Mutex<EventEmitter>,
}

impl EmitterBroker {
    pub fn new(emitter: EventEmitter) -> Self {
        EmitterBroker {
            emitter: Mutex::new(emitter),
        }
    }
}

#[async_trait]
impl Broker for EmitterBroker {
    async fn publish(&self, delivery: &Delivery<'_>) -> Result<(), PublishError> {
        let payload = String::from_utf8_lossy(delivery.payload).into_owned();
        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| PublishError::Other("event emitter poisoned".into()))?;
        emitter.emit(delivery.event_type, payload);
        Ok(())
    }
}
