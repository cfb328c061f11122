use super::backoff::{backoff_for_attempt, sleep_with_cancellation};
use super::dispatcher::WorkItem;
use super::progress::{ProgressEvent, ProgressSender};
use crate::extraction::{
    ArtifactStore, ExtractionError, ExtractionOutcome, ExtractionRequest, ExtractionResult,
    Extractor,
};
use crate::runtime::config::AgentConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub(crate) type SharedWorkReceiver = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: usize,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts().max(1),
            timeout: config.extraction_timeout(),
            initial_backoff: config.retry_initial_backoff(),
            max_backoff: config.retry_max_backoff(),
        }
    }
}

/// Counts items currently held by workers.
#[derive(Debug, Default)]
pub struct WorkerActivityTracker {
    active: AtomicUsize,
}

impl WorkerActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(self: &Arc<Self>) -> WorkerActivityGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        WorkerActivityGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct WorkerActivityGuard {
    tracker: Arc<WorkerActivityTracker>,
}

impl Drop for WorkerActivityGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct WorkerShared {
    pub work_rx: SharedWorkReceiver,
    pub extractor: Arc<dyn Extractor>,
    pub artifacts: Arc<ArtifactStore>,
    pub progress_tx: ProgressSender,
    pub telemetry: Arc<Telemetry>,
    pub activity: Arc<WorkerActivityTracker>,
    pub policy: RetryPolicy,
}

impl Clone for WorkerShared {
    fn clone(&self) -> Self {
        Self {
            work_rx: Arc::clone(&self.work_rx),
            extractor: Arc::clone(&self.extractor),
            artifacts: Arc::clone(&self.artifacts),
            progress_tx: self.progress_tx.clone(),
            telemetry: Arc::clone(&self.telemetry),
            activity: Arc::clone(&self.activity),
            policy: self.policy,
        }
    }
}

/// One executor of the pool. Takes items off the shared queue and keeps each one,
/// including its admission slot, until it reaches a terminal outcome.
pub(crate) struct Worker {
    id: usize,
    shared: WorkerShared,
    shutdown: CancellationToken,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: WorkerShared, shutdown: CancellationToken) -> Self {
        Self {
            id,
            shared,
            shutdown,
        }
    }

    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub(crate) async fn run(self) -> Result<()> {
        tracing::debug!(worker = self.id, "worker task started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                item = async { self.shared.work_rx.lock().await.recv().await } => item,
            };
            let Some(item) = next else {
                break;
            };
            self.process(item).await;
        }

        tracing::debug!(worker = self.id, "worker task stopped");
        Ok(())
    }

    async fn process(&self, mut item: WorkItem) {
        let _active = self.shared.activity.enter();
        let policy = self.shared.policy;

        loop {
            item.attempts += 1;
            let request = ExtractionRequest {
                document_id: item.document_id.clone(),
                locator: item.locator.clone(),
                attempt: item.attempts,
            };

            let error = match self.attempt(&request).await {
                ExtractionOutcome::TransientFailure { error } => error,
                terminal => {
                    self.report(&item, terminal).await;
                    return;
                }
            };

            if item.attempts >= policy.max_attempts {
                self.report(
                    &item,
                    ExtractionOutcome::PermanentFailure {
                        error: format!("retries exhausted after {} attempts: {error}", item.attempts),
                    },
                )
                .await;
                return;
            }

            let backoff =
                backoff_for_attempt(policy.initial_backoff, policy.max_backoff, item.attempts);
            tracing::warn!(
                worker = self.id,
                sequence = item.sequence(),
                document_id = %item.document_id,
                attempt = item.attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "extraction failed transiently; retrying"
            );
            self.report(&item, ExtractionOutcome::TransientFailure { error })
                .await;

            if sleep_with_cancellation(backoff, Some(&self.shutdown))
                .await
                .is_err()
            {
                tracing::info!(
                    worker = self.id,
                    sequence = item.sequence(),
                    "shutdown during retry backoff; item will be redelivered"
                );
                return;
            }
        }
    }

    async fn attempt(&self, request: &ExtractionRequest) -> ExtractionOutcome {
        let telemetry = &self.shared.telemetry;
        let timeout_after = self.shared.policy.timeout;

        match timeout(timeout_after, self.shared.extractor.extract(request)).await {
            Err(_) => {
                telemetry.record_extraction_timeout();
                ExtractionOutcome::TransientFailure {
                    error: format!("extraction timed out after {}ms", timeout_after.as_millis()),
                }
            }
            Ok(Err(ExtractionError::Transient(error))) => {
                telemetry.record_transient_failure();
                ExtractionOutcome::TransientFailure { error }
            }
            Ok(Err(ExtractionError::Permanent(error))) => {
                ExtractionOutcome::PermanentFailure { error }
            }
            Ok(Ok(contents)) => match self
                .shared
                .artifacts
                .write(&request.document_id, &contents)
                .await
            {
                Ok(artifact) => ExtractionOutcome::Success { artifact },
                Err(err) => {
                    telemetry.record_transient_failure();
                    ExtractionOutcome::TransientFailure {
                        error: format!("failed to store artifact: {err:#}"),
                    }
                }
            },
        }
    }

    /// Sends before the item is dropped so the tracker sees the completion ahead of any
    /// dispatch that reuses the freed admission slot.
    async fn report(&self, item: &WorkItem, outcome: ExtractionOutcome) {
        let result = ExtractionResult {
            sequence: item.sequence(),
            document_id: Some(item.document_id.clone()),
            attempts: item.attempts,
            elapsed: item.first_seen.elapsed(),
            outcome,
        };
        if self
            .shared
            .progress_tx
            .send(ProgressEvent::Completed(result))
            .await
            .is_err()
        {
            tracing::debug!(
                worker = self.id,
                sequence = item.sequence(),
                "progress tracker gone; dropping result"
            );
        }
    }
}
