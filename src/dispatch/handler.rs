use std::any::Any;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::Context;
use crate::error::{DispatchError, HandlerError};
use crate::message::{AnyMessage, DomainEvent, Message};

/// Type-erased handler result travelling back up the middleware chain.
pub type Reply = Box<dyn Any + Send>;

/// Handles one message type.
///
/// Handlers stage their writes on the context's transaction instead of
/// committing them; the middleware chain decides when the transaction ends.
///
/// ```ignore
/// struct CreateOrderHandler;
///
/// #[async_trait]
/// impl Handler<CreateOrder> for CreateOrderHandler {
///     async fn handle(&self, ctx: &mut Context, cmd: &CreateOrder) -> Result<OrderId, HandlerError> {
///         let mut order = Order::create(cmd)?;
///         ctx.stage(&order)?;
///         ctx.publish_from(&mut order).await?;
///         Ok(order.id.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: Message>: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut Context, message: &M) -> Result<M::Output, HandlerError>;
}

/// Innermost link of a middleware chain.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn call(&self, ctx: &mut Context, message: &dyn AnyMessage)
        -> Result<Reply, DispatchError>;
}

fn downcast<'m, M: Message>(message: &'m dyn AnyMessage) -> Result<&'m M, DispatchError> {
    message
        .downcast_ref::<M>()
        .ok_or(DispatchError::MessageType {
            expected: M::NAME,
            actual: message.message_type(),
        })
}

/// The single handler of a command or query.
pub(crate) struct Single<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> Single<M, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> ErasedHandler for Single<M, H>
where
    M: Message,
    H: Handler<M>,
{
    async fn call(
        &self,
        ctx: &mut Context,
        message: &dyn AnyMessage,
    ) -> Result<Reply, DispatchError> {
        let message = downcast::<M>(message)?;
        let output = self
            .handler
            .handle(ctx, message)
            .await
            .map_err(|source| DispatchError::Handler {
                message_type: M::NAME,
                source,
            })?;
        Ok(Box::new(output))
    }
}

/// Every handler of one event type, invoked in registration order.
///
/// The first failure stops the fan-out.
pub(crate) struct Fanout<E> {
    handlers: Vec<Box<dyn Handler<E>>>,
}

impl<E: DomainEvent> Fanout<E> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handler: Box<dyn Handler<E>>) {
        self.handlers.push(handler);
    }
}

#[async_trait]
impl<E: DomainEvent> ErasedHandler for Fanout<E> {
    async fn call(
        &self,
        ctx: &mut Context,
        message: &dyn AnyMessage,
    ) -> Result<Reply, DispatchError> {
        let event = downcast::<E>(message)?;
        for (position, handler) in self.handlers.iter().enumerate() {
            if let Err(source) = handler.handle(ctx, event).await {
                tracing::debug!(
                    event_type = E::NAME,
                    position,
                    skipped = self.handlers.len() - position - 1,
                    "event handler failed; remaining handlers skipped"
                );
                return Err(DispatchError::Handler {
                    message_type: E::NAME,
                    source,
                });
            }
        }
        Ok(Box::new(()))
    }
}

/// Stand-in for event types nobody listens to in-process.
pub(crate) struct NoListeners;

#[async_trait]
impl ErasedHandler for NoListeners {
    async fn call(
        &self,
        _ctx: &mut Context,
        _message: &dyn AnyMessage,
    ) -> Result<Reply, DispatchError> {
        Ok(Box::new(()))
    }
}
