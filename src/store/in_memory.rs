use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{OutboxStore, Record, StagedChange, Transaction, UnitOfWork};
use crate::error::StoreError;
use crate::outbox::OutboxMessage;

#[derive(Default)]
struct Tables {
    records: HashMap<&'static str, BTreeMap<String, Value>>,
    outbox: Vec<OutboxMessage>,
}

/// Process-local store holding both record tables and the outbox table.
///
/// A commit applies every staged change under one write lock, so readers see
/// all of a transaction or none of it. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    failing_commits: Arc<AtomicUsize>,
    commits: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail after the transaction has been handed over,
    /// as if the process died before the write became durable.
    pub fn fail_next_commit(&self) {
        self.failing_commits.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        tables
            .records
            .get(R::TABLE)
            .and_then(|table| table.get(key))
            .map(decode_row::<R>)
            .transpose()
    }

    /// Every committed row of `R`'s table, ordered by key.
    pub fn all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        match tables.records.get(R::TABLE) {
            Some(table) => table.values().map(decode_row::<R>).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of the outbox table in insertion order.
    pub fn outbox_rows(&self) -> Result<Vec<OutboxMessage>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(tables.outbox.clone())
    }

    pub fn outbox_row(&self, id: Uuid) -> Result<Option<OutboxMessage>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(tables.outbox.iter().find(|row| row.id == id).cloned())
    }

    fn update_row<T>(
        &self,
        id: Uuid,
        update: impl FnOnce(&mut OutboxMessage) -> T,
    ) -> Result<T, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        let row = tables
            .outbox
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(StoreError::MessageNotFound(id))?;
        Ok(update(row))
    }
}

fn decode_row<R: Record>(row: &Value) -> Result<R, StoreError> {
    serde_json::from_value(row.clone()).map_err(|e| StoreError::Serialization {
        table: R::TABLE,
        reason: e.to_string(),
    })
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn begin(&self) -> Result<Transaction, StoreError> {
        Ok(Transaction::new())
    }

    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        let tx_id = tx.id();
        let changes = tx.into_changes();

        let injected = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            tracing::warn!(transaction = %tx_id, "commit failed (injected)");
            return Err(StoreError::CommitFailed(format!(
                "injected failure for transaction {}",
                tx_id
            )));
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;

        let mut records = 0usize;
        let mut outbox = 0usize;
        for change in changes {
            match change {
                StagedChange::Put { table, key, row } => {
                    tables.records.entry(table).or_default().insert(key, row);
                    records += 1;
                }
                StagedChange::Delete { table, key } => {
                    if let Some(rows) = tables.records.get_mut(table) {
                        rows.remove(&key);
                    }
                    records += 1;
                }
                StagedChange::Outbox(message) => {
                    tables.outbox.push(message);
                    outbox += 1;
                }
            }
        }
        drop(tables);

        self.commits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(transaction = %tx_id, records, outbox, "transaction committed");
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn unprocessed(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        // Order every row, not only pending ones, so the cursor row is found
        // even after it was marked processed. Stable sort: insertion order
        // breaks occurred_on ties.
        let mut ordered: Vec<&OutboxMessage> = tables.outbox.iter().collect();
        ordered.sort_by_key(|row| row.occurred_on);

        let start = match after {
            Some(id) => match ordered.iter().position(|row| row.id == id) {
                Some(position) => position + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        Ok(ordered[start..]
            .iter()
            .filter(|row| row.is_pending())
            .take(limit)
            .map(|row| (*row).clone())
            .collect())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        self.update_row(id, |row| row.mark_processed(SystemTime::now()))?;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<u32, StoreError> {
        self.update_row(id, |row| row.record_failure(error))
    }

    async fn quarantine(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.update_row(id, |row| row.quarantine(reason))
    }

    async fn purge_processed(&self, before: SystemTime) -> Result<usize, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox purge"))?;
        let len = tables.outbox.len();
        tables.outbox.retain(|row| {
            !(row.processed && row.processed_on.map_or(false, |at| at < before))
        });
        Ok(len - tables.outbox.len())
    }
}
