//! Transactional retry controller
//!
//! Runs the batch processor once per attempt, each attempt inside its own
//! transaction when the store supports it. Every attempt ends in exactly one
//! [`AttemptResult`]; the controller decides from that tag alone whether to
//! stop or to run the attempt again.

use arcs_common::config::ImportConfig;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::ImportError;
use super::outcome::{CreatedRecords, ImportOutcome};
use super::processor::{BatchProcessor, ProcessFailure};
use super::progress::{ImportMonitor, ImportPhase};
use super::spool::Spool;
use super::store::ImportStore;

/// Bound on attempts and the backoff between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): doubles each time,
    /// capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// How one attempt ended
#[derive(Debug)]
pub enum AttemptResult {
    /// Every record persisted and the transaction committed
    Committed(CreatedRecords),
    /// Transient failure; the attempt was rolled back and may be re-run
    RetryRequested(ImportError),
    /// Terminal failure. `partial` holds records that survived (only ever
    /// non-empty when the store cannot roll back).
    Fatal {
        error: ImportError,
        partial: CreatedRecords,
    },
}

pub struct RetryController<'a> {
    store: &'a dyn ImportStore,
    policy: RetryPolicy,
}

impl<'a> RetryController<'a> {
    pub fn new(store: &'a dyn ImportStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Run attempts until one commits, one fails terminally, or the attempt
    /// ceiling is reached
    pub async fn run(
        &self,
        spool: &Spool,
        processor: &BatchProcessor<'_>,
        monitor: &ImportMonitor,
    ) -> ImportOutcome {
        let mut attempt = 0;

        loop {
            attempt += 1;
            monitor.begin_attempt(attempt);
            debug!(repo_id = processor.repo_id(), attempt, "Starting import attempt");

            match self.attempt(spool, processor).await {
                AttemptResult::Committed(created) => {
                    info!(
                        repo_id = processor.repo_id(),
                        attempt,
                        records = created.len(),
                        "Batch import committed"
                    );
                    return ImportOutcome::success(created);
                }
                AttemptResult::Fatal { error, partial } => {
                    warn!(
                        repo_id = processor.repo_id(),
                        attempt,
                        error = %error,
                        kept = partial.len(),
                        "Batch import failed"
                    );
                    return ImportOutcome::failure(partial, &error);
                }
                AttemptResult::RetryRequested(error) => {
                    if attempt >= self.policy.max_attempts {
                        error!(
                            repo_id = processor.repo_id(),
                            attempt,
                            error = %error,
                            "Batch import failed: retry limit reached"
                        );
                        return ImportOutcome::failure(CreatedRecords::new(), &error);
                    }

                    let backoff = self.policy.backoff(attempt);
                    warn!(
                        repo_id = processor.repo_id(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Batch import rolled back, will retry after backoff"
                    );
                    monitor.set_phase(ImportPhase::Retrying);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One pass over the spool
    pub async fn attempt(&self, spool: &Spool, processor: &BatchProcessor<'_>) -> AttemptResult {
        let mvcc = self.store.supports_mvcc();

        let reader = match spool.open().await {
            Ok(reader) => reader,
            Err(error) => {
                return AttemptResult::Fatal {
                    error,
                    partial: CreatedRecords::new(),
                }
            }
        };

        let mut session = match self.store.begin().await {
            Ok(session) => session,
            Err(error) => return self.failed(error, CreatedRecords::new()),
        };

        match processor.process(reader, session.as_mut()).await {
            Ok(created) => match session.commit().await {
                Ok(()) => AttemptResult::Committed(created),
                Err(error) => {
                    // Without MVCC every insert is already durable
                    let partial = if mvcc { CreatedRecords::new() } else { created };
                    self.failed(error, partial)
                }
            },
            Err(ProcessFailure { error, partial }) => {
                if let Err(rollback_error) = session.rollback().await {
                    warn!(error = %rollback_error, "Rollback after failed attempt did not complete");
                }
                let partial = if mvcc { CreatedRecords::new() } else { partial };
                self.failed(error, partial)
            }
        }
    }

    /// Tag a failed attempt. Only rolled-back (MVCC) attempts are retried;
    /// without MVCC the partial writes are kept and reported as they are.
    fn failed(&self, error: ImportError, partial: CreatedRecords) -> AttemptResult {
        if error.is_retryable() && self.store.supports_mvcc() {
            AttemptResult::RetryRequested(error)
        } else {
            AttemptResult::Fatal { error, partial }
        }
    }
}
