use std::sync::Arc;

use async_trait::async_trait;

use super::{OutboxMessage, TypeRegistry};
use crate::dispatch::{Context, Middleware, Next, Reply};
use crate::error::{ConfigError, DispatchError, HandlerError};
use crate::message::AnyMessage;
use crate::store::UnitOfWork;

/// Wraps every handler of a kind with outbox semantics.
///
/// Begins a transaction (or joins the one already on the context), runs the
/// rest of the chain, stages an [`OutboxMessage`] for the handled message on
/// the same transaction and, when it began the transaction, commits it. Any
/// failure before the commit rolls everything back. A failing joined scope
/// rolls the shared transaction back to where the scope started.
pub struct OutboxMiddleware {
    uow: Arc<dyn UnitOfWork>,
    registry: Arc<TypeRegistry>,
}

impl OutboxMiddleware {
    pub fn new<U>(uow: U, registry: Arc<TypeRegistry>) -> Self
    where
        U: UnitOfWork + 'static,
    {
        Self {
            uow: Arc::new(uow),
            registry,
        }
    }

    async fn run_and_stage(
        &self,
        ctx: &mut Context,
        message: &dyn AnyMessage,
        next: Next<'_>,
    ) -> Result<Reply, DispatchError> {
        let reply = next.run(ctx, message).await?;

        let payload = self.registry.encode(message)?;
        let mut row = OutboxMessage::new(message.message_type(), payload);
        row.metadata = ctx.metadata().clone();
        let row_id = row.id;

        let tx = ctx.transaction_mut().ok_or(DispatchError::Handler {
            message_type: message.message_type(),
            source: HandlerError::NoTransaction,
        })?;
        tx.stage_outbox(row);
        tracing::debug!(
            transaction = %tx.id(),
            outbox_id = %row_id,
            event_type = message.message_type(),
            "outbox row staged"
        );
        Ok(reply)
    }
}

#[async_trait]
impl Middleware for OutboxMiddleware {
    async fn handle(
        &self,
        ctx: &mut Context,
        message: &dyn AnyMessage,
        next: Next<'_>,
    ) -> Result<Reply, DispatchError> {
        if let Some(savepoint) = ctx.transaction_mut().map(|tx| tx.len()) {
            // Joined scope: the owner commits. A failure here still undoes
            // whatever this scope staged, in case the caller swallows it.
            let outcome = self.run_and_stage(ctx, message, next).await;
            if outcome.is_err() {
                if let Some(tx) = ctx.transaction_mut() {
                    tx.truncate(savepoint);
                }
            }
            return outcome;
        }

        let tx = self.uow.begin().await?;
        let tx_id = tx.id();
        ctx.attach(tx);

        let outcome = self.run_and_stage(ctx, message, next).await;
        let Some(tx) = ctx.detach() else {
            return outcome;
        };

        match outcome {
            Ok(reply) => {
                self.uow.commit(tx).await?;
                tracing::debug!(
                    transaction = %tx_id,
                    message_type = message.message_type(),
                    "unit of work committed"
                );
                Ok(reply)
            }
            Err(error) => {
                if let Err(rollback_error) = self.uow.rollback(tx).await {
                    tracing::warn!(
                        transaction = %tx_id,
                        error = %rollback_error,
                        "rollback failed"
                    );
                }
                tracing::debug!(
                    transaction = %tx_id,
                    message_type = message.message_type(),
                    %error,
                    "unit of work rolled back"
                );
                Err(error)
            }
        }
    }

    fn validate(&self, message_types: &[&'static str]) -> Result<(), ConfigError> {
        match message_types
            .iter()
            .find(|name| !self.registry.contains(name))
        {
            Some(&message_type) => Err(ConfigError::Unregistered { message_type }),
            None => Ok(()),
        }
    }
}
