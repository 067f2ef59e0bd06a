use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;

use super::handler::{ErasedHandler, Reply};
use super::Context;
use crate::error::{ConfigError, DispatchError};
use crate::message::AnyMessage;

/// A link in the per-kind middleware chain.
///
/// Middleware sees every message of the kinds it is installed on through the
/// type-erased [`AnyMessage`] view, and decides whether and when to call
/// [`Next::run`].
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &mut Context,
        message: &dyn AnyMessage,
        next: Next<'_>,
    ) -> Result<Reply, DispatchError>;

    /// Called once by the builder with the `NAME` of every message type routed
    /// through this middleware.
    fn validate(&self, _message_types: &[&'static str]) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// The rest of the chain, ending in the handler.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    handler: &'a dyn ErasedHandler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], handler: &'a dyn ErasedHandler) -> Self {
        Self { chain, handler }
    }

    pub async fn run(
        self,
        ctx: &mut Context,
        message: &dyn AnyMessage,
    ) -> Result<Reply, DispatchError> {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                let next = Next {
                    chain: rest,
                    handler: self.handler,
                };
                middleware.handle(ctx, message, next).await
            }
            None => self.handler.call(ctx, message).await,
        }
    }
}

/// Opens one span per message and logs how it finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(
        &self,
        ctx: &mut Context,
        message: &dyn AnyMessage,
        next: Next<'_>,
    ) -> Result<Reply, DispatchError> {
        let correlation_id = ctx.correlation_id().unwrap_or_default().to_string();
        let span = tracing::info_span!(
            "message",
            message_type = message.message_type(),
            kind = %message.kind(),
            correlation_id = %correlation_id,
            nested = ctx.has_transaction(),
        );

        let started = Instant::now();
        let result = next.run(ctx, message).instrument(span.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        span.in_scope(|| match &result {
            Ok(_) => tracing::debug!(elapsed_ms, "handled"),
            Err(error) => tracing::warn!(elapsed_ms, %error, "failed"),
        });
        result
    }
}
