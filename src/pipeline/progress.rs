//! Progress Tracker: the single owner of a shard's checkpoint.
//!
//! Results arrive out of submission order over a channel. The tracker keeps the
//! dispatched-but-not-terminal window in a [`Frontier`] and persists only its contiguous
//! terminal prefix, at most once per checkpoint interval plus a final flush when every
//! producer has gone away.

use super::backoff::{
    retry_with_backoff, RetryBackoff, RetryDisposition, CHECKPOINT_INITIAL_BACKOFF,
    CHECKPOINT_MAX_BACKOFF,
};
use super::frontier::Frontier;
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::extraction::{ExtractionOutcome, ExtractionResult};
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

pub const FAILURE_LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Sent by the dispatcher before the item can reach a worker.
    Dispatched { sequence: u64 },
    Completed(ExtractionResult),
}

pub type ProgressSender = mpsc::Sender<ProgressEvent>;
pub type ProgressReceiver = mpsc::Receiver<ProgressEvent>;

pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Last position durably written to the checkpoint store.
    pub checkpointed: Option<u64>,
    /// Highest contiguous terminal position, possibly not yet persisted.
    pub frontier: Option<u64>,
    /// Dispatched items without a terminal outcome.
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub sequence: u64,
    pub document_id: Option<String>,
    pub attempts: usize,
    pub error: String,
}

/// Most recent permanent failures, oldest dropped first.
#[derive(Debug, Default)]
pub struct FailureLog {
    entries: Mutex<VecDeque<FailureRecord>>,
}

impl FailureLog {
    pub fn push(&self, record: FailureRecord) {
        let mut entries = self.entries.lock().expect("failure log poisoned");
        if entries.len() == FAILURE_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    pub fn recent(&self) -> Vec<FailureRecord> {
        self.entries
            .lock()
            .expect("failure log poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

pub(crate) struct ProgressTrackerParams {
    pub shard_id: String,
    pub store: Arc<dyn CheckpointStore>,
    pub resume_after: Option<u64>,
    pub checkpoint_interval: Duration,
    pub checkpoint_max_attempts: usize,
    pub telemetry: Arc<Telemetry>,
    pub snapshot_tx: watch::Sender<ProgressSnapshot>,
    pub failures: Arc<FailureLog>,
    pub fatal_handler: Arc<FatalErrorHandler>,
}

pub(crate) struct ProgressTracker {
    shard_id: String,
    store: Arc<dyn CheckpointStore>,
    frontier: Frontier,
    persisted: Option<u64>,
    checkpoint_interval: Duration,
    checkpoint_max_attempts: usize,
    telemetry: Arc<Telemetry>,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
    failures: Arc<FailureLog>,
    fatal_handler: Arc<FatalErrorHandler>,
}

impl ProgressTracker {
    pub(crate) fn new(params: ProgressTrackerParams) -> Self {
        let tracker = Self {
            shard_id: params.shard_id,
            store: params.store,
            frontier: Frontier::new(params.resume_after),
            persisted: params.resume_after,
            checkpoint_interval: params.checkpoint_interval,
            checkpoint_max_attempts: params.checkpoint_max_attempts.max(1),
            telemetry: params.telemetry,
            snapshot_tx: params.snapshot_tx,
            failures: params.failures,
            fatal_handler: params.fatal_handler,
        };
        tracker.publish();
        tracker
    }

    /// Consumes events until every sender is dropped, then flushes the final position.
    #[tracing::instrument(name = "progress_tracker", skip_all, fields(shard = %self.shard_id))]
    pub(crate) async fn run(mut self, mut events: ProgressReceiver) -> Result<()> {
        let mut ticker = time::interval(self.checkpoint_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Err(err) = self.flush().await {
                        return Err(self.fatal_handler.trigger_external("checkpoint store", err));
                    }
                }
            }
        }

        tracing::info!(
            frontier = ?self.frontier.contiguous(),
            pending = self.frontier.pending(),
            "progress tracker draining; writing final checkpoint"
        );
        if let Err(err) = self.flush().await {
            return Err(self.fatal_handler.trigger_external("checkpoint store", err));
        }
        Ok(())
    }

    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Dispatched { sequence } => {
                if !self.frontier.register(sequence) {
                    tracing::warn!(sequence, "ignoring dispatch at or behind the frontier");
                }
            }
            ProgressEvent::Completed(result) => self.record_result(result),
        }
        self.publish();
    }

    fn record_result(&mut self, result: ExtractionResult) {
        let document_id = result.document_id.as_ref().map(|id| id.to_string());
        let elapsed_ms = result.elapsed.as_millis() as u64;
        if result.is_terminal() && result.attempts > 0 {
            self.telemetry.record_processing_duration(result.elapsed);
        }
        match &result.outcome {
            ExtractionOutcome::Success { artifact } => {
                self.telemetry.record_success();
                tracing::debug!(
                    sequence = result.sequence,
                    document_id = ?document_id,
                    attempts = result.attempts,
                    elapsed_ms,
                    artifact = %artifact.display(),
                    "extraction succeeded"
                );
            }
            ExtractionOutcome::PermanentFailure { error } => {
                self.telemetry.record_permanent_failure();
                tracing::error!(
                    alert = "permanent_failure",
                    shard = %self.shard_id,
                    sequence = result.sequence,
                    document_id = ?document_id,
                    attempts = result.attempts,
                    elapsed_ms,
                    error = %error,
                    "document permanently failed extraction"
                );
                self.failures.push(FailureRecord {
                    sequence: result.sequence,
                    document_id,
                    attempts: result.attempts,
                    error: error.clone(),
                });
            }
            ExtractionOutcome::TransientFailure { error } => {
                tracing::debug!(
                    sequence = result.sequence,
                    attempts = result.attempts,
                    error = %error,
                    "attempt failed transiently; item stays pending"
                );
                return;
            }
        }

        if !self.frontier.is_pending(result.sequence) {
            tracing::warn!(
                sequence = result.sequence,
                "terminal result for a sequence that is not pending"
            );
            return;
        }
        self.frontier.complete(result.sequence);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(ProgressSnapshot {
            checkpointed: self.persisted,
            frontier: self.frontier.contiguous(),
            pending: self.frontier.pending(),
        });
    }

    async fn flush(&mut self) -> Result<()> {
        let Some(target) = self.frontier.contiguous() else {
            return Ok(());
        };
        if self.persisted.is_some_and(|persisted| persisted >= target) {
            return Ok(());
        }

        let checkpoint = Checkpoint::new(self.shard_id.clone(), target);
        let store = self.store.clone();
        let telemetry = self.telemetry.clone();
        let shard = self.shard_id.clone();

        retry_with_backoff(
            RetryBackoff::new(CHECKPOINT_INITIAL_BACKOFF, CHECKPOINT_MAX_BACKOFF)
                .with_max_attempts(self.checkpoint_max_attempts),
            |_| store.save(&checkpoint),
            |attempt, backoff, err, will_retry| {
                telemetry.record_checkpoint_write_failure();
                tracing::warn!(
                    shard = %shard,
                    sequence = target,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    will_retry,
                    error = %err,
                    "checkpoint write failed"
                );
            },
            |_, err| {
                if err.downcast_ref::<CheckpointError>().is_some() {
                    RetryDisposition::Abort
                } else {
                    RetryDisposition::Retry
                }
            },
        )
        .await
        .with_context(|| format!("failed to persist checkpoint {target} for shard {shard}"))?;

        self.telemetry.record_checkpoint_write();
        self.persisted = Some(target);
        self.publish();
        tracing::info!(sequence = target, "checkpoint advanced");
        Ok(())
    }
}
