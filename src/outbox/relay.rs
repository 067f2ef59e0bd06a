//! Background publisher for the outbox table.
//!
//! Each cycle pages through the unprocessed rows oldest first, rebuilds their
//! messages through the [`TypeRegistry`], publishes them and marks them
//! processed once the broker acknowledges. Failed rows stay unprocessed and
//! are retried on the next cycle, so delivery is at-least-once.
//!
//! `batch_size` caps how many rows a cycle publishes. Rows that fail or
//! cannot be resolved do not use it up, so they never starve the rows queued
//! behind them.
//!
//! Only one relay may work a store at a time; rows are not claimed or leased.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use super::{OutboxMessage, TypeRegistry};
use crate::broker::{Broker, Delivery};
use crate::config::RelayConfig;
use crate::error::{PublishError, RelayError};
use crate::store::OutboxStore;

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub loaded: usize,
    pub published: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub quarantined: usize,
    pub purged: usize,
}

/// Totals over the lifetime of a spawned relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub cycles: u64,
    pub cycle_errors: u64,
    pub published: u64,
    pub failed: u64,
    pub unresolved: u64,
    pub quarantined: u64,
    pub purged: u64,
}

impl RelayStats {
    fn absorb(&mut self, report: &CycleReport) {
        self.published += report.published as u64;
        self.failed += report.failed as u64;
        self.unresolved += report.unresolved as u64;
        self.quarantined += report.quarantined as u64;
        self.purged += report.purged as u64;
    }
}

pub struct OutboxRelay<S, B> {
    store: S,
    broker: B,
    registry: Arc<TypeRegistry>,
    config: RelayConfig,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OutboxStore + 'static,
    B: Broker + 'static,
{
    pub fn new(store: S, broker: B, registry: Arc<TypeRegistry>) -> Self {
        Self {
            store,
            broker,
            registry,
            config: RelayConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run one cycle. Store failures abort the cycle; broker failures never do.
    pub async fn run_cycle(&self) -> Result<CycleReport, RelayError> {
        let mut report = CycleReport::default();
        let mut cursor = None;

        loop {
            let remaining = self.config.batch_size.saturating_sub(report.published);
            if remaining == 0 {
                break;
            }
            let rows = self.store.unprocessed(cursor, remaining).await?;
            let Some(last) = rows.last() else {
                break;
            };
            cursor = Some(last.id);
            report.loaded += rows.len();

            for row in &rows {
                self.relay_row(row, &mut report).await?;
            }
        }

        if let Some(retention) = self.config.retention {
            if let Some(cutoff) = SystemTime::now().checked_sub(retention) {
                report.purged = self.store.purge_processed(cutoff).await?;
                if report.purged > 0 {
                    tracing::info!(purged = report.purged, ?retention, "purged processed outbox rows");
                }
            }
        }

        if report.loaded > 0 {
            tracing::debug!(
                loaded = report.loaded,
                published = report.published,
                failed = report.failed,
                unresolved = report.unresolved,
                "relay cycle finished"
            );
        }
        Ok(report)
    }

    async fn relay_row(
        &self,
        row: &OutboxMessage,
        report: &mut CycleReport,
    ) -> Result<(), RelayError> {
        let message = match self.registry.decode(&row.event_type, &row.payload) {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(
                    id = %row.id,
                    event_type = %row.event_type,
                    %error,
                    "outbox row cannot be resolved; skipped"
                );
                report.unresolved += 1;
                return Ok(());
            }
        };

        let delivery = Delivery {
            id: row.id,
            event_type: &row.event_type,
            payload: &row.payload,
            message: message.as_ref(),
            metadata: &row.metadata,
            occurred_on: row.occurred_on,
            attempt: row.attempts.saturating_add(1),
        };

        let timeout = self.config.publish_timeout;
        let outcome = match tokio::time::timeout(timeout, self.broker.publish(&delivery)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(timeout)),
        };

        match outcome {
            Ok(()) => {
                self.store.mark_processed(row.id).await?;
                report.published += 1;
                tracing::debug!(id = %row.id, event_type = %row.event_type, "outbox row published");
            }
            Err(error) => {
                report.failed += 1;
                let attempts = self.store.record_failure(row.id, &error.to_string()).await?;
                tracing::warn!(
                    id = %row.id,
                    event_type = %row.event_type,
                    attempts,
                    %error,
                    "publish failed; row left for the next cycle"
                );

                if let Some(max_attempts) = self.config.max_attempts {
                    if attempts >= max_attempts {
                        let reason = format!("gave up after {} attempts: {}", attempts, error);
                        self.store.quarantine(row.id, &reason).await?;
                        report.quarantined += 1;
                        tracing::error!(
                            id = %row.id,
                            event_type = %row.event_type,
                            attempts,
                            "outbox row quarantined"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Loop until `shutdown` turns true or its sender is dropped.
    ///
    /// Shutdown is only observed between cycles.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RelayStats {
        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            publish_timeout = ?self.config.publish_timeout,
            "outbox relay started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = RelayStats::default();

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    stats.cycles += 1;
                    match self.run_cycle().await {
                        Ok(report) => stats.absorb(&report),
                        Err(error) => {
                            stats.cycle_errors += 1;
                            tracing::error!(%error, "relay cycle failed");
                        }
                    }
                }
            }
        }

        tracing::info!(
            cycles = stats.cycles,
            published = stats.published,
            failed = stats.failed,
            "outbox relay stopped"
        );
        stats
    }

    /// Run the loop on the tokio runtime.
    pub fn spawn(self) -> RelayHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(stop_rx));
        RelayHandle {
            stop_tx,
            join: Some(join),
        }
    }
}

/// Handle to a spawned relay. Dropping it asks the relay to stop.
pub struct RelayHandle {
    stop_tx: watch::Sender<bool>,
    join: Option<JoinHandle<RelayStats>>,
}

impl RelayHandle {
    /// Ask the relay to stop after its current cycle.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop the relay and wait for it, returning its totals.
    ///
    /// Fails with the task's [`JoinError`] if the relay panicked.
    pub async fn stop(mut self) -> Result<RelayStats, JoinError> {
        self.signal_stop();
        match self.join.take() {
            Some(join) => join.await.map_err(|error| {
                tracing::error!(%error, "relay task ended abnormally");
                error
            }),
            None => Ok(RelayStats::default()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}
