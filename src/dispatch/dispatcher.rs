use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::handler::{ErasedHandler, Fanout, Handler, NoListeners, Reply, Single};
use super::middleware::{Middleware, Next, TracingMiddleware};
use super::Context;
use crate::error::{ConfigError, DispatchError};
use crate::message::{Command, DomainEvent, Message, Query};
use crate::outbox::{OutboxMiddleware, TypeRegistry};
use crate::store::UnitOfWork;

struct Route {
    handler: Arc<dyn ErasedHandler>,
}

struct Routes {
    commands: HashMap<TypeId, Route>,
    queries: HashMap<TypeId, Route>,
    events: HashMap<TypeId, Route>,
    command_chain: Vec<Arc<dyn Middleware>>,
    query_chain: Vec<Arc<dyn Middleware>>,
    event_chain: Vec<Arc<dyn Middleware>>,
    dispatch_timeout: Option<Duration>,
}

/// Routes commands and queries to their single handler and events to every
/// subscribed handler, through the middleware chain installed for each kind.
///
/// Cheap to clone; routing tables are immutable once built.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<Routes>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// A fresh top-level context with its own correlation id.
    pub fn context(&self) -> Context {
        Context::new(self.clone())
    }

    /// Dispatch a command to its handler.
    pub async fn dispatch<C: Command>(&self, command: C) -> Result<C::Output, DispatchError> {
        let mut ctx = self.context();
        let deadline = self.routes.dispatch_timeout;
        with_deadline(C::NAME, deadline, self.dispatch_in(&mut ctx, &command)).await
    }

    /// Dispatch with an explicit deadline. A command that misses it leaves no
    /// committed state behind.
    pub async fn dispatch_with_timeout<C: Command>(
        &self,
        command: C,
        timeout: Duration,
    ) -> Result<C::Output, DispatchError> {
        let mut ctx = self.context();
        with_deadline(C::NAME, Some(timeout), self.dispatch_in(&mut ctx, &command)).await
    }

    /// Run a query against its handler.
    pub async fn query<Q: Query>(&self, query: Q) -> Result<Q::Output, DispatchError> {
        let mut ctx = self.context();
        let deadline = self.routes.dispatch_timeout;
        with_deadline(Q::NAME, deadline, self.query_in(&mut ctx, &query)).await
    }

    /// Notify every handler of an event in registration order.
    pub async fn notify<E: DomainEvent>(&self, event: E) -> Result<(), DispatchError> {
        let mut ctx = self.context();
        let deadline = self.routes.dispatch_timeout;
        with_deadline(E::NAME, deadline, self.notify_in(&mut ctx, &event)).await
    }

    pub(crate) async fn dispatch_in<C: Command>(
        &self,
        ctx: &mut Context,
        command: &C,
    ) -> Result<C::Output, DispatchError> {
        let route = self
            .routes
            .commands
            .get(&TypeId::of::<C>())
            .ok_or(DispatchError::HandlerNotFound {
                message_type: C::NAME,
            })?;
        let reply = Next::new(&self.routes.command_chain, route.handler.as_ref())
            .run(ctx, command)
            .await?;
        downcast_reply::<C>(reply)
    }

    pub(crate) async fn query_in<Q: Query>(
        &self,
        ctx: &mut Context,
        query: &Q,
    ) -> Result<Q::Output, DispatchError> {
        let route = self
            .routes
            .queries
            .get(&TypeId::of::<Q>())
            .ok_or(DispatchError::HandlerNotFound {
                message_type: Q::NAME,
            })?;
        let reply = Next::new(&self.routes.query_chain, route.handler.as_ref())
            .run(ctx, query)
            .await?;
        downcast_reply::<Q>(reply)
    }

    pub(crate) async fn notify_in<E: DomainEvent>(
        &self,
        ctx: &mut Context,
        event: &E,
    ) -> Result<(), DispatchError> {
        let handler: &dyn ErasedHandler = match self.routes.events.get(&TypeId::of::<E>()) {
            Some(route) => route.handler.as_ref(),
            None => &NoListeners,
        };
        Next::new(&self.routes.event_chain, handler)
            .run(ctx, event)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.routes.commands.len())
            .field("queries", &self.routes.queries.len())
            .field("events", &self.routes.events.len())
            .field("dispatch_timeout", &self.routes.dispatch_timeout)
            .finish()
    }
}

fn downcast_reply<M: Message>(reply: Reply) -> Result<M::Output, DispatchError> {
    reply
        .downcast::<M::Output>()
        .map(|output| *output)
        .map_err(|_| DispatchError::ReplyType {
            message_type: M::NAME,
        })
}

async fn with_deadline<T, F>(
    message_type: &'static str,
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, DispatchError>>,
{
    match deadline {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(message_type, ?after, "dispatch timed out; transaction dropped");
                Err(DispatchError::Timeout {
                    message_type,
                    after,
                })
            }
        },
        None => fut.await,
    }
}

/// Typed slot accumulating the handlers of one event type.
trait EventSlot: Send + Sync {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_handler(self: Box<Self>) -> Arc<dyn ErasedHandler>;
}

impl<E: DomainEvent> EventSlot for Fanout<E> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_handler(self: Box<Self>) -> Arc<dyn ErasedHandler> {
        Arc::from(self as Box<dyn ErasedHandler>)
    }
}

struct Registration<T> {
    name: &'static str,
    slot: T,
}

/// Builds a [`Dispatcher`].
///
/// Middleware runs in the order it is added: the first one added for a kind
/// is the outermost.
///
/// ```ignore
/// let dispatcher = Dispatcher::builder()
///     .with_tracing()
///     .with_outbox(store.clone(), registry.clone())
///     .command::<CreateOrder, _>(CreateOrderHandler)
///     .query::<GetOrder, _>(GetOrderHandler::new(store.clone()))
///     .event::<OrderCreated>()
///     .build()?;
/// ```
#[derive(Default)]
pub struct DispatcherBuilder {
    commands: HashMap<TypeId, Registration<Arc<dyn ErasedHandler>>>,
    queries: HashMap<TypeId, Registration<Arc<dyn ErasedHandler>>>,
    events: HashMap<TypeId, Registration<Box<dyn EventSlot>>>,
    command_chain: Vec<Arc<dyn Middleware>>,
    query_chain: Vec<Arc<dyn Middleware>>,
    event_chain: Vec<Arc<dyn Middleware>>,
    dispatch_timeout: Option<Duration>,
    duplicates: Vec<&'static str>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler of command `C`.
    pub fn command<C, H>(mut self, handler: H) -> Self
    where
        C: Command,
        H: Handler<C>,
    {
        let handler: Arc<dyn ErasedHandler> = Arc::new(Single::<C, H>::new(handler));
        if self
            .commands
            .insert(
                TypeId::of::<C>(),
                Registration {
                    name: C::NAME,
                    slot: handler,
                },
            )
            .is_some()
        {
            self.duplicates.push(C::NAME);
        }
        self
    }

    /// Register the handler of query `Q`.
    pub fn query<Q, H>(mut self, handler: H) -> Self
    where
        Q: Query,
        H: Handler<Q>,
    {
        let handler: Arc<dyn ErasedHandler> = Arc::new(Single::<Q, H>::new(handler));
        if self
            .queries
            .insert(
                TypeId::of::<Q>(),
                Registration {
                    name: Q::NAME,
                    slot: handler,
                },
            )
            .is_some()
        {
            self.duplicates.push(Q::NAME);
        }
        self
    }

    /// Subscribe a handler to event `E`. Any number may subscribe.
    pub fn on<E, H>(mut self, handler: H) -> Self
    where
        E: DomainEvent,
        H: Handler<E>,
    {
        self.event_slot::<E>().push(Box::new(handler));
        self
    }

    /// Declare event `E` without subscribing a handler, so build-time
    /// validation covers it.
    pub fn event<E: DomainEvent>(mut self) -> Self {
        self.event_slot::<E>();
        self
    }

    fn event_slot<E: DomainEvent>(&mut self) -> &mut Fanout<E> {
        let registration = self
            .events
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Registration {
                name: E::NAME,
                slot: Box::new(Fanout::<E>::new()),
            });
        match registration.slot.as_any_mut().downcast_mut::<Fanout<E>>() {
            Some(fanout) => fanout,
            None => unreachable!("event slot keyed by TypeId holds a different type"),
        }
    }

    pub fn command_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.command_chain.push(Arc::new(middleware));
        self
    }

    pub fn query_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.query_chain.push(Arc::new(middleware));
        self
    }

    pub fn event_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.event_chain.push(Arc::new(middleware));
        self
    }

    /// Install the outbox middleware on commands and events.
    pub fn with_outbox<U>(mut self, uow: U, registry: Arc<TypeRegistry>) -> Self
    where
        U: UnitOfWork + 'static,
    {
        let outbox: Arc<dyn Middleware> = Arc::new(OutboxMiddleware::new(uow, registry));
        self.command_chain.push(outbox.clone());
        self.event_chain.push(outbox);
        self
    }

    /// Install [`TracingMiddleware`] on every kind.
    pub fn with_tracing(mut self) -> Self {
        let tracing: Arc<dyn Middleware> = Arc::new(TracingMiddleware);
        self.command_chain.push(tracing.clone());
        self.query_chain.push(tracing.clone());
        self.event_chain.push(tracing);
        self
    }

    /// Default deadline for `dispatch`, `query` and `notify`.
    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Dispatcher, ConfigError> {
        if let Some(&name) = self.duplicates.first() {
            return Err(ConfigError::DuplicateHandler(name));
        }

        validate_chain(&self.command_chain, self.commands.values().map(|r| r.name))?;
        validate_chain(&self.query_chain, self.queries.values().map(|r| r.name))?;
        validate_chain(&self.event_chain, self.events.values().map(|r| r.name))?;

        let commands = into_routes(self.commands, |handler| handler);
        let queries = into_routes(self.queries, |handler| handler);
        let events = into_routes(self.events, |slot| slot.into_handler());

        tracing::debug!(
            commands = commands.len(),
            queries = queries.len(),
            events = events.len(),
            "dispatcher built"
        );

        Ok(Dispatcher {
            routes: Arc::new(Routes {
                commands,
                queries,
                events,
                command_chain: self.command_chain,
                query_chain: self.query_chain,
                event_chain: self.event_chain,
                dispatch_timeout: self.dispatch_timeout,
            }),
        })
    }
}

fn validate_chain(
    chain: &[Arc<dyn Middleware>],
    names: impl Iterator<Item = &'static str>,
) -> Result<(), ConfigError> {
    let mut names: Vec<&'static str> = names.collect();
    names.sort_unstable();
    for middleware in chain {
        middleware.validate(&names)?;
    }
    Ok(())
}

fn into_routes<T>(
    registrations: HashMap<TypeId, Registration<T>>,
    finish: impl Fn(T) -> Arc<dyn ErasedHandler>,
) -> HashMap<TypeId, Route> {
    registrations
        .into_iter()
        .map(|(id, registration)| {
            (
                id,
                Route {
                    handler: finish(registration.slot),
                },
            )
        })
        .collect()
}
