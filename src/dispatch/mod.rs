//! Command, query and event dispatch.
//!
//! ```text
//! dispatch(cmd) ─► [command middleware...] ─► Handler<C>
//! query(q)      ─► [query middleware...]   ─► Handler<Q>
//! notify(evt)   ─► [event middleware...]   ─► Handler<E> × n (in order)
//! ```

mod context;
mod dispatcher;
mod handler;
mod middleware;

pub use context::Context;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use handler::{Handler, Reply};
pub use middleware::{Middleware, Next, TracingMiddleware};
