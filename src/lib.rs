//! Transactional outbox with a command/query/event pipeline.
//!
//! State changes and the messages announcing them are committed in one
//! unit of work; a background relay later publishes the stored messages to a
//! broker and marks them processed.
//!
//! ```text
//! caller ─► Dispatcher ─► OutboxMiddleware ─► Handler ─► stage(record)
//!                              │
//!                              └─ stage(OutboxMessage) ─► commit (one transaction)
//!
//! OutboxRelay ─► unprocessed rows ─► TypeRegistry::decode ─► Broker ─► mark_processed
//! ```

mod aggregate;
mod broker;
mod codec;
mod config;
mod dispatch;
mod error;
mod message;
mod outbox;
mod store;

pub use aggregate::{AggregateRoot, EventBuffer, RaisedEvent};
#[cfg(feature = "emitter")]
pub use broker::EmitterBroker;
pub use broker::{Broker, Delivery, InMemoryBroker, LogBroker, LogBrokerError, PublishedMessage};
pub use codec::Codec;
pub use config::RelayConfig;
pub use dispatch::{
    Context, Dispatcher, DispatcherBuilder, Handler, Middleware, Next, Reply, TracingMiddleware,
};
pub use error::{
    CodecError, ConfigError, DispatchError, HandlerError, PublishError, RegistryError,
    RelayError, StoreError,
};
pub use message::{AnyMessage, Command, DomainEvent, Message, MessageKind, Query};
pub use outbox::{
    CycleReport, OutboxMessage, OutboxMiddleware, OutboxRelay, RelayHandle, RelayStats,
    TypeRegistry, CORRELATION_ID,
};
pub use store::{InMemoryStore, OutboxStore, Record, StagedChange, Transaction, UnitOfWork};

// Derive macros share names with the traits they implement.
pub use outboxed_macros::{Command, DomainEvent, Query, Record};

pub use async_trait::async_trait;

#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
