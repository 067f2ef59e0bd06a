//! Unit of work and outbox storage contracts.
//!
//! A handler never writes to storage directly. It stages rows on the
//! [`Transaction`] carried by its context; the outbox middleware stages the
//! outbox row on the same transaction and the [`UnitOfWork`] commits both in
//! one step. The relay then works the outbox through [`OutboxStore`].
//!
//! ```text
//!  handler ──stage(record)──┐
//!                           ├──► Transaction ──commit──► UnitOfWork
//!  middleware ─stage_outbox─┘                               │
//!                                                           ▼
//!  relay ◄──unprocessed / mark_processed── OutboxStore (same storage)
//! ```

mod in_memory;
mod transaction;

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::outbox::OutboxMessage;

pub use in_memory::InMemoryStore;
pub use transaction::{StagedChange, Transaction};

/// A row that can be staged on a transaction.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Table (or collection) the row belongs to.
    const TABLE: &'static str;

    /// Primary key of this row within its table.
    fn key(&self) -> String;
}

/// Transaction boundary shared by the inner handler and the outbox middleware.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Open a new, empty transaction.
    async fn begin(&self) -> Result<Transaction, StoreError>;

    /// Make every staged change durable, or none of them.
    async fn commit(&self, tx: Transaction) -> Result<(), StoreError>;

    /// Discard every staged change.
    async fn rollback(&self, tx: Transaction) -> Result<(), StoreError> {
        tx.discard();
        Ok(())
    }
}

/// Relay-side access to the outbox table.
///
/// Only the relay calls the mutating methods; producers insert rows through
/// [`UnitOfWork::commit`].
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Rows with `processed = false` that are not quarantined, oldest
    /// `occurred_on` first, at most `limit` of them.
    ///
    /// With `after = Some(id)` only rows ordered after row `id` are returned,
    /// so a caller can page past rows it skipped. An unknown `id` yields no
    /// rows.
    async fn unprocessed(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Flip `processed` to true. Calling it again for the same row is a no-op.
    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Record a failed publish attempt. Returns the attempt count so far.
    async fn record_failure(&self, id: Uuid, error: &str) -> Result<u32, StoreError>;

    /// Take a row out of circulation without marking it processed.
    async fn quarantine(&self, id: Uuid, reason: &str) -> Result<(), StoreError>;

    /// Delete processed rows whose `processed_on` is older than `before`.
    /// Returns the number of rows removed.
    async fn purge_processed(&self, before: SystemTime) -> Result<usize, StoreError>;
}

#[async_trait]
impl<T: UnitOfWork + ?Sized> UnitOfWork for Arc<T> {
    async fn begin(&self) -> Result<Transaction, StoreError> {
        (**self).begin().await
    }

    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        (**self).commit(tx).await
    }

    async fn rollback(&self, tx: Transaction) -> Result<(), StoreError> {
        (**self).rollback(tx).await
    }
}

#[async_trait]
impl<T: OutboxStore + ?Sized> OutboxStore for Arc<T> {
    async fn unprocessed(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        (**self).unprocessed(after, limit).await
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        (**self).mark_processed(id).await
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<u32, StoreError> {
        (**self).record_failure(id, error).await
    }

    async fn quarantine(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        (**self).quarantine(id, reason).await
    }

    async fn purge_processed(&self, before: SystemTime) -> Result<usize, StoreError> {
        (**self).purge_processed(before).await
    }
}
