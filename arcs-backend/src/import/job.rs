//! One batch import request, from request body to outcome frame

use arcs_common::config::ImportConfig;
use arcs_common::RecordTypeRegistry;
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::outcome::{CreatedRecords, ImportOutcome};
use super::processor::BatchProcessor;
use super::progress::{progress_stream, ImportMonitor, ImportPhase};
use super::retry::{RetryController, RetryPolicy};
use super::spool::Spool;
use super::store::ImportStore;

/// Everything a worker needs to run one import
#[derive(Clone)]
pub struct ImportJob {
    pub import_id: Uuid,
    pub repo_id: i64,
    pub registry: Arc<RecordTypeRegistry>,
    pub store: Arc<dyn ImportStore>,
    pub policy: RetryPolicy,
    pub spool_dir: Option<PathBuf>,
    pub progress_interval: Duration,
    /// Receives the message of a failed import (surfaced by /health)
    pub last_error: Option<Arc<RwLock<Option<String>>>>,
}

impl ImportJob {
    pub fn new(
        repo_id: i64,
        registry: Arc<RecordTypeRegistry>,
        store: Arc<dyn ImportStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            import_id: Uuid::new_v4(),
            repo_id,
            registry,
            store,
            policy,
            spool_dir: None,
            progress_interval: Duration::from_millis(ImportConfig::default().progress_interval_ms),
            last_error: None,
        }
    }

    /// Spawn the worker and return the frame stream for the response body.
    ///
    /// The worker spools `body`, runs the retry controller, removes the spool
    /// and hands the outcome to the stream, which writes it as its final frame.
    pub fn start<S, E>(self, body: S) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let monitor = Arc::new(ImportMonitor::new());
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let import_id = self.import_id;
        let interval = self.progress_interval;

        info!(import_id = %import_id, repo_id = self.repo_id, "Batch import started");

        let worker_monitor = Arc::clone(&monitor);
        tokio::spawn(async move {
            let outcome = self.run(body, &worker_monitor).await;

            if let (Some(errors), Some(sink)) = (&outcome.errors, &self.last_error) {
                *sink.write().await = errors.first().cloned();
            }

            if outcome_tx.send(outcome).is_err() {
                warn!(import_id = %import_id, "Client went away before the import outcome was sent");
            }
        });

        progress_stream(import_id, monitor, interval, outcome_rx)
    }

    async fn run<S, E>(&self, body: S, monitor: &ImportMonitor) -> ImportOutcome
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let spool = match Spool::from_stream(body, self.spool_dir.as_deref(), monitor).await {
            Ok(spool) => spool,
            Err(e) => {
                error!(import_id = %self.import_id, error = %e, "Failed to spool import stream");
                return ImportOutcome::failure(CreatedRecords::new(), &e);
            }
        };

        let processor = BatchProcessor::new(&self.registry, self.repo_id, monitor);
        let controller = RetryController::new(self.store.as_ref(), self.policy);
        let outcome = controller.run(&spool, &processor, monitor).await;

        monitor.set_phase(ImportPhase::Finishing);
        spool.close();

        info!(
            import_id = %self.import_id,
            repo_id = self.repo_id,
            saved = outcome.saved.len(),
            success = outcome.is_success(),
            "Batch import finished"
        );
        outcome
    }
}
