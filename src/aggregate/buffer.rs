use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::dispatch::Context;
use crate::error::HandlerError;
use crate::message::{AnyMessage, DomainEvent};

type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// A raised event waiting to be handed to the pipeline.
pub trait RaisedEvent: Send + Sync + 'static {
    fn message(&self) -> &dyn AnyMessage;

    /// Notify the event through `ctx`, joining its transaction.
    fn publish<'a>(self: Box<Self>, ctx: &'a mut Context) -> PublishFuture<'a>;
}

impl<E: DomainEvent> RaisedEvent for E {
    fn message(&self) -> &dyn AnyMessage {
        self
    }

    fn publish<'a>(self: Box<Self>, ctx: &'a mut Context) -> PublishFuture<'a> {
        Box::pin(async move { ctx.notify(*self).await })
    }
}

/// Pending domain events of one aggregate, in the order they were raised.
///
/// Not persisted: mark the field `#[serde(skip)]` on serializable aggregates.
#[derive(Default)]
pub struct EventBuffer {
    pending: Vec<Box<dyn RaisedEvent>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise<E: DomainEvent>(&mut self, event: E) {
        self.pending.push(Box::new(event));
    }

    pub fn drain(&mut self) -> Vec<Box<dyn RaisedEvent>> {
        std::mem::take(&mut self.pending)
    }

    /// Names of the pending events, oldest first.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.pending
            .iter()
            .map(|event| event.message().message_type())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuffer")
            .field("pending", &self.event_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageKind};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shipped {
        order_id: String,
    }

    impl Message for Shipped {
        const NAME: &'static str = "Shipped";
        const KIND: MessageKind = MessageKind::Event;
        type Output = ();
    }

    impl DomainEvent for Shipped {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Delivered {
        order_id: String,
    }

    impl Message for Delivered {
        const NAME: &'static str = "Delivered";
        const KIND: MessageKind = MessageKind::Event;
        type Output = ();
    }

    impl DomainEvent for Delivered {}

    #[test]
    fn drain_returns_events_in_raise_order_and_clears() {
        let mut buffer = EventBuffer::new();
        buffer.raise(Shipped {
            order_id: "o-1".into(),
        });
        buffer.raise(Delivered {
            order_id: "o-1".into(),
        });
        assert_eq!(buffer.event_types(), vec!["Shipped", "Delivered"]);

        let drained = buffer.drain();
        assert!(buffer.is_empty());
        assert_eq!(drained.len(), 2);
        assert_eq!(
            drained[0].message().downcast_ref::<Shipped>(),
            Some(&Shipped {
                order_id: "o-1".into()
            })
        );
    }
}
