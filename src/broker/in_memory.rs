use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Broker, Delivery};
use crate::error::PublishError;

/// A delivery the broker acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub occurred_on: SystemTime,
    pub attempt: u32,
}

/// Broker that appends acknowledged deliveries to a shared log.
///
/// Clones share the log and the failure switches, so a test can keep one
/// handle while the relay owns another.
#[derive(Clone)]
pub struct InMemoryBroker {
    log: Arc<RwLock<Vec<PublishedMessage>>>,
    reachable: Arc<AtomicBool>,
    failures: Arc<AtomicUsize>,
    rejected: Arc<Mutex<HashSet<String>>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(Vec::new())),
            reachable: Arc::new(AtomicBool::new(true)),
            failures: Arc::new(AtomicUsize::new(0)),
            rejected: Arc::new(Mutex::new(HashSet::new())),
            latency: Arc::new(Mutex::new(None)),
        }
    }

    /// An unreachable broker fails every publish with
    /// [`PublishError::Unreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Fail the next `count` publishes, then recover.
    pub fn fail_next(&self, count: usize) {
        self.failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Reject every delivery of `event_type` until cleared.
    pub fn reject(&self, event_type: impl Into<String>) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(event_type.into());
        }
    }

    pub fn clear_rejections(&self) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.clear();
        }
    }

    /// Delay every acknowledgment, e.g. to trip the relay's publish timeout.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Snapshot of everything acknowledged so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.log.read().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|message| message.event_type)
            .collect()
    }

    /// How many times the row `id` was acknowledged.
    pub fn deliveries_of(&self, id: Uuid) -> usize {
        self.log
            .read()
            .map(|log| log.iter().filter(|message| message.id == id).count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latency(&self) -> Option<Duration> {
        self.latency.lock().ok().and_then(|latency| *latency)
    }

    fn is_rejected(&self, event_type: &str) -> bool {
        self.rejected
            .lock()
            .map(|rejected| rejected.contains(event_type))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, delivery: &Delivery<'_>) -> Result<(), PublishError> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }
        if !self.is_reachable() {
            return Err(PublishError::Unreachable("in-memory broker is offline".into()));
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PublishError::Unreachable("scripted failure".into()));
        }
        if self.is_rejected(delivery.event_type) {
            return Err(PublishError::Rejected(format!(
                "{} is not accepted",
                delivery.event_type
            )));
        }

        let mut log = self
            .log
            .write()
            .map_err(|_| PublishError::Other("broker log poisoned".into()))?;
        log.push(PublishedMessage {
            id: delivery.id,
            event_type: delivery.event_type.to_string(),
            payload: delivery.payload.to_vec(),
            metadata: delivery.metadata.clone(),
            occurred_on: delivery.occurred_on,
            attempt: delivery.attempt,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DomainEvent, Message, MessageKind};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Pinged;

    impl Message for Pinged {
        const NAME: &'static str = "Pinged";
        const KIND: MessageKind = MessageKind::Event;
        type Output = ();
    }

    impl DomainEvent for Pinged {}

    fn delivery<'a>(
        id: Uuid,
        message: &'a Pinged,
        metadata: &'a HashMap<String, String>,
    ) -> Delivery<'a> {
        Delivery {
            id,
            event_type: Pinged::NAME,
            payload: b"null",
            message,
            metadata,
            occurred_on: SystemTime::now(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn records_acknowledged_deliveries() {
        let broker = InMemoryBroker::new();
        let metadata = HashMap::new();
        let id = Uuid::new_v4();
        broker.publish(&delivery(id, &Pinged, &metadata)).await.unwrap();

        assert_eq!(broker.event_types(), vec!["Pinged"]);
        assert_eq!(broker.deliveries_of(id), 1);
    }

    #[tokio::test]
    async fn offline_broker_acknowledges_nothing() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let metadata = HashMap::new();

        let err = broker
            .publish(&delivery(Uuid::new_v4(), &Pinged, &metadata))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Unreachable(_)));
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn scripted_failures_run_out() {
        let broker = InMemoryBroker::new();
        broker.fail_next(1);
        let metadata = HashMap::new();
        let id = Uuid::new_v4();

        assert!(broker.publish(&delivery(id, &Pinged, &metadata)).await.is_err());
        assert!(broker.publish(&delivery(id, &Pinged, &metadata)).await.is_ok());
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test]
    async fn rejected_types_are_refused() {
        let broker = InMemoryBroker::new();
        broker.reject("Pinged");
        let metadata = HashMap::new();

        let err = broker
            .publish(&delivery(Uuid::new_v4(), &Pinged, &metadata))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected(_)));

        broker.clear_rejections();
        assert!(broker
            .publish(&delivery(Uuid::new_v4(), &Pinged, &metadata))
            .await
            .is_ok());
    }
}
