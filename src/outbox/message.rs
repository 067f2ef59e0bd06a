use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key under which the dispatch correlation id is stored.
pub const CORRELATION_ID: &str = "correlation_id";

/// A row in the outbox table.
///
/// Created by the outbox middleware inside the producing transaction and
/// afterwards touched only by the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    /// Stable discriminator of the payload schema (the message `NAME`).
    pub event_type: String,
    #[serde(with = "payload_serde")]
    pub payload: Vec<u8>,
    pub occurred_on: SystemTime,
    pub processed: bool,
    pub processed_on: Option<SystemTime>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub quarantined: bool,
    /// Metadata forwarded to the broker (correlation id and the like).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(payload).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

impl OutboxMessage {
    /// A fresh, unprocessed row stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            occurred_on: SystemTime::now(),
            processed: false,
            processed_on: None,
            attempts: 0,
            last_error: None,
            quarantined: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID).map(String::as_str)
    }

    /// Eligible for the next relay cycle.
    pub fn is_pending(&self) -> bool {
        !self.processed && !self.quarantined
    }

    /// Payload as UTF-8 text, if it is text.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Returns `true` only on the false to true transition.
    pub(crate) fn mark_processed(&mut self, at: SystemTime) -> bool {
        if self.processed {
            return false;
        }
        self.processed = true;
        self.processed_on = Some(at);
        true
    }

    pub(crate) fn record_failure(&mut self, error: &str) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.attempts
    }

    pub(crate) fn quarantine(&mut self, reason: &str) {
        self.quarantined = true;
        self.last_error = Some(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_row_is_pending() {
        let row = OutboxMessage::new("OrderCreated", b"{}".to_vec());
        assert!(row.is_pending());
        assert_eq!(row.attempts, 0);
        assert_eq!(row.payload_str(), Some("{}"));
    }

    #[test]
    fn processed_never_reverts() {
        let mut row = OutboxMessage::new("OrderCreated", Vec::new());
        let first = SystemTime::now();
        assert!(row.mark_processed(first));
        assert!(!row.mark_processed(SystemTime::now()));
        assert!(row.processed);
        assert_eq!(row.processed_on, Some(first));
    }

    #[test]
    fn failures_accumulate() {
        let mut row = OutboxMessage::new("OrderCreated", Vec::new());
        row.record_failure("broker down");
        assert_eq!(row.record_failure("still down"), 2);
        assert_eq!(row.last_error.as_deref(), Some("still down"));
        assert!(row.is_pending());

        row.quarantine("gave up");
        assert!(!row.is_pending());
        assert!(!row.processed);
    }

    #[test]
    fn payload_is_base64_in_json() {
        let row = OutboxMessage::new("Raw", vec![0xff, 0x00])
            .with_metadata(CORRELATION_ID, "abc");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["payload"], "/wA=");
        assert_eq!(json["metadata"]["correlation_id"], "abc");

        let back: OutboxMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.payload, vec![0xff, 0x00]);
        assert_eq!(back.correlation_id(), Some("abc"));
    }
}
