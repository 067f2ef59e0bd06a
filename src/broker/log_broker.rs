use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

use super::{Broker, Delivery};
use crate::error::PublishError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogBrokerError {
    #[error("log broker buffer poisoned")]
    BufferPoisoned,
}

/// Broker that writes each delivery as one log line, through `tracing` or
/// into a buffer.
///
/// Text payloads are logged as-is; binary payloads are base64-encoded.
#[derive(Debug, Clone, Default)]
pub struct LogBroker {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogBroker {
    pub fn new() -> Self {
        LogBroker { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogBroker {
            buffer: Some(buffer),
        }
    }

    fn render(delivery: &Delivery<'_>) -> String {
        let payload = match std::str::from_utf8(delivery.payload) {
            Ok(text) => text.to_string(),
            Err(_) => format!("base64:{}", STANDARD.encode(delivery.payload)),
        };
        let meta = if delivery.metadata.is_empty() {
            String::new()
        } else {
            let mut pairs: Vec<_> = delivery.metadata.iter().collect();
            pairs.sort();
            format!(" meta={:?}", pairs)
        };
        format!(
            "[OUTBOX] {} {} {}{}",
            delivery.event_type, delivery.id, payload, meta
        )
    }
}

#[async_trait]
impl Broker for LogBroker {
    async fn publish(&self, delivery: &Delivery<'_>) -> Result<(), PublishError> {
        let line = Self::render(delivery);
        match &self.buffer {
            Some(buffer) => {
                let mut buffer = buffer
                    .lock()
                    .map_err(|_| PublishError::Other(Box::new(LogBrokerError::BufferPoisoned)))?;
                buffer.push(line);
            }
            None => tracing::info!(
                target: "outboxed::broker",
                event_type = delivery.event_type,
                id = %delivery.id,
                attempt = delivery.attempt,
                "{}",
                line
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::SystemTime;

    use super::*;
    use crate::message::{DomainEvent, Message, MessageKind};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Serialize, Deserialize)]
    struct UserCreated {
        id: String,
    }

    impl Message for UserCreated {
        const NAME: &'static str = "UserCreated";
        const KIND: MessageKind = MessageKind::Event;
        type Output = ();
    }

    impl DomainEvent for UserCreated {}

    #[tokio::test]
    async fn writes_text_payload_and_metadata_to_buffer() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let broker = LogBroker::with_buffer(buffer.clone());
        let event = UserCreated { id: "123".into() };
        let mut metadata = HashMap::new();
        metadata.insert("correlation_id".to_string(), "req-123".to_string());

        broker
            .publish(&Delivery {
                id: Uuid::new_v4(),
                event_type: "UserCreated",
                payload: br#"{"id":"123"}"#,
                message: &event,
                metadata: &metadata,
                occurred_on: SystemTime::now(),
                attempt: 1,
            })
            .await
            .unwrap();

        let logs = buffer.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("UserCreated"));
        assert!(logs[0].contains(r#"{"id":"123"}"#));
        assert!(logs[0].contains("req-123"));
    }

    #[tokio::test]
    async fn binary_payload_is_base64() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let broker = LogBroker::with_buffer(buffer.clone());
        let event = UserCreated { id: "1".into() };
        let metadata = HashMap::new();

        broker
            .publish(&Delivery {
                id: Uuid::new_v4(),
                event_type: "UserCreated",
                payload: &[0xff, 0x00],
                message: &event,
                metadata: &metadata,
                occurred_on: SystemTime::now(),
                attempt: 1,
            })
            .await
            .unwrap();

        assert!(buffer.lock().unwrap()[0].contains("base64:/wA="));
    }
}
