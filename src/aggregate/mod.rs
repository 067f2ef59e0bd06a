//! Aggregate-side event production.
//!
//! Aggregates raise domain events into an [`EventBuffer`] while they mutate
//! their own state. A handler drains the buffer through
//! [`Context::publish_from`](crate::Context::publish_from) once the
//! aggregate's invariants hold; the events then travel the event chain and
//! reach the outbox inside the handler's transaction.

mod buffer;

pub use buffer::{EventBuffer, RaisedEvent};

/// An aggregate that buffers the domain events it raises.
pub trait AggregateRoot {
    fn pending_events(&mut self) -> &mut EventBuffer;

    /// Remove and return everything raised so far.
    fn take_events(&mut self) -> Vec<Box<dyn RaisedEvent>> {
        self.pending_events().drain()
    }
}

/// Implement [`AggregateRoot`] by pointing at the buffer field.
///
/// ```ignore
/// impl_aggregate_root!(Order, events);
/// ```
#[macro_export]
macro_rules! impl_aggregate_root {
    ($ty:ty, $buffer:ident) => {
        impl $crate::AggregateRoot for $ty {
            fn pending_events(&mut self) -> &mut $crate::EventBuffer {
                &mut self.$buffer
            }
        }
    };
}
