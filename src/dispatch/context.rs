//! Per-dispatch context handed to middleware and handlers.
//!
//! The context carries the unit-of-work transaction for the current
//! top-level dispatch, the message metadata (correlation id) and a handle back
//! to the dispatcher, so a handler can notify events or dispatch further
//! commands that join its transaction.

use std::collections::HashMap;

use uuid::Uuid;

use super::Dispatcher;
use crate::aggregate::AggregateRoot;
use crate::error::HandlerError;
use crate::message::{Command, DomainEvent, Query};
use crate::outbox::CORRELATION_ID;
use crate::store::{Record, Transaction};

pub struct Context {
    dispatcher: Dispatcher,
    transaction: Option<Transaction>,
    metadata: HashMap<String, String>,
}

impl Context {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(CORRELATION_ID.to_string(), Uuid::new_v4().to_string());
        Self {
            dispatcher,
            transaction: None,
            metadata,
        }
    }

    /// Replace the generated correlation id, e.g. with one taken from an
    /// incoming request.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.insert(CORRELATION_ID.to_string(), id.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID).map(String::as_str)
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Add metadata copied onto every outbox row written in this context.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// The open transaction. Fails when no unit-of-work middleware began one.
    pub fn transaction(&mut self) -> Result<&mut Transaction, HandlerError> {
        self.transaction.as_mut().ok_or(HandlerError::NoTransaction)
    }

    /// Stage a record write on the open transaction.
    pub fn stage<R: Record>(&mut self, record: &R) -> Result<(), HandlerError> {
        self.transaction()?.stage(record)?;
        Ok(())
    }

    /// Notify an event inside this context's transaction.
    pub async fn notify<E: DomainEvent>(&mut self, event: E) -> Result<(), HandlerError> {
        let dispatcher = self.dispatcher.clone();
        dispatcher.notify_in(self, &event).await?;
        Ok(())
    }

    /// Dispatch a command inside this context's transaction.
    pub async fn dispatch<C: Command>(&mut self, command: C) -> Result<C::Output, HandlerError> {
        let dispatcher = self.dispatcher.clone();
        Ok(dispatcher.dispatch_in(self, &command).await?)
    }

    pub async fn query<Q: Query>(&mut self, query: Q) -> Result<Q::Output, HandlerError> {
        let dispatcher = self.dispatcher.clone();
        Ok(dispatcher.query_in(self, &query).await?)
    }

    /// Drain the aggregate's pending events into the event chain, oldest
    /// first. Stops at the first failing event.
    pub async fn publish_from<A>(&mut self, aggregate: &mut A) -> Result<(), HandlerError>
    where
        A: AggregateRoot + Send + ?Sized,
    {
        for event in aggregate.take_events() {
            event.publish(self).await?;
        }
        Ok(())
    }

    pub(crate) fn attach(&mut self, tx: Transaction) {
        self.transaction = Some(tx);
    }

    pub(crate) fn detach(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }

    pub(crate) fn transaction_mut(&mut self) -> Option<&mut Transaction> {
        self.transaction.as_mut()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("transaction", &self.transaction.as_ref().map(Transaction::id))
            .field("metadata", &self.metadata)
            .finish()
    }
}
