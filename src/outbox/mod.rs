//! Outbox table, type registry, outbox middleware and relay.

mod message;
mod middleware;
mod registry;
mod relay;

pub use message::{OutboxMessage, CORRELATION_ID};
pub use middleware::OutboxMiddleware;
pub use registry::TypeRegistry;
pub use relay::{CycleReport, OutboxRelay, RelayHandle, RelayStats};
