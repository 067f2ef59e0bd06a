use serde_json::Value;
use uuid::Uuid;

use super::Record;
use crate::error::StoreError;
use crate::outbox::OutboxMessage;

/// A single pending write.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedChange {
    Put {
        table: &'static str,
        key: String,
        row: Value,
    },
    Delete {
        table: &'static str,
        key: String,
    },
    Outbox(OutboxMessage),
}

/// Change set collected during one unit of work.
///
/// Nothing staged here is visible to readers until the owning
/// [`UnitOfWork`](super::UnitOfWork) commits it. Dropping a transaction
/// without committing discards it.
#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    changes: Vec<StagedChange>,
    finished: bool,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            changes: Vec::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }


    /// Stage an insert-or-replace of `record`.
    pub fn stage<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let row = serde_json::to_value(record).map_err(|e| StoreError::Serialization {
            table: R::TABLE,
            reason: e.to_string(),
        })?;
        self.changes.push(StagedChange::Put {
            table: R::TABLE,
            key: record.key(),
            row,
        });
        Ok(())
    }

    /// Stage removal of the row with `key` from `R`'s table.
    pub fn remove<R: Record>(&mut self, key: impl Into<String>) {
        self.changes.push(StagedChange::Delete {
            table: R::TABLE,
            key: key.into(),
        });
    }

    /// Stage a new outbox row.
    pub fn stage_outbox(&mut self, message: OutboxMessage) {
        self.changes.push(StagedChange::Outbox(message));
    }

    pub fn changes(&self) -> &[StagedChange] {
        &self.changes
    }

    /// Outbox rows staged so far.
    pub fn outbox_messages(&self) -> impl Iterator<Item = &OutboxMessage> {
        self.changes.iter().filter_map(|change| match change {
            StagedChange::Outbox(message) => Some(message),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Drop every change staged after the first `len`, returning to a
    /// savepoint taken with [`Transaction::len`].
    pub(crate) fn truncate(&mut self, len: usize) {
        if len < self.changes.len() {
            tracing::debug!(
                transaction = %self.id,
                discarded = self.changes.len() - len,
                "rolled back to savepoint"
            );
            self.changes.truncate(len);
        }
    }

    /// Hand the staged changes to a store for commit.
    pub fn into_changes(mut self) -> Vec<StagedChange> {
        self.finished = true;
        std::mem::take(&mut self.changes)
    }

    /// Drop every staged change.
    pub fn discard(mut self) {
        tracing::debug!(
            transaction = %self.id,
            changes = self.changes.len(),
            "transaction rolled back"
        );
        self.finished = true;
        self.changes.clear();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.changes.is_empty() {
            tracing::warn!(
                transaction = %self.id,
                changes = self.changes.len(),
                "transaction dropped before commit; staged changes discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Customer {
        id: String,
        name: String,
    }

    impl Record for Customer {
        const TABLE: &'static str = "customers";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn stage_serializes_the_row() {
        let mut tx = Transaction::new();
        tx.stage(&Customer {
            id: "c-1".into(),
            name: "Ada".into(),
        })
        .unwrap();

        match &tx.changes()[0] {
            StagedChange::Put { table, key, row } => {
                assert_eq!(*table, "customers");
                assert_eq!(key, "c-1");
                assert_eq!(row["name"], "Ada");
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn outbox_messages_filters_staged_rows() {
        let mut tx = Transaction::new();
        tx.remove::<Customer>("c-9");
        tx.stage_outbox(OutboxMessage::new("CustomerRemoved", b"{}".to_vec()));

        assert_eq!(tx.len(), 2);
        let rows: Vec<_> = tx.outbox_messages().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, "CustomerRemoved");
    }

    #[test]
    fn truncate_returns_to_savepoint() {
        let mut tx = Transaction::new();
        tx.stage_outbox(OutboxMessage::new("Kept", Vec::new()));
        let savepoint = tx.len();
        tx.remove::<Customer>("c-1");
        tx.stage_outbox(OutboxMessage::new("Dropped", Vec::new()));

        tx.truncate(savepoint);
        assert_eq!(tx.len(), 1);
        let rows: Vec<_> = tx.outbox_messages().map(|row| row.event_type.as_str()).collect();
        assert_eq!(rows, vec!["Kept"]);

        tx.truncate(5);
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn into_changes_empties_the_transaction() {
        let mut tx = Transaction::new();
        tx.stage_outbox(OutboxMessage::new("Event", Vec::new()));
        let changes = tx.into_changes();
        assert_eq!(changes.len(), 1);
    }
}
