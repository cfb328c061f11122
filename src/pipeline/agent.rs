//! Stream-driven extraction pipeline for one shard.
//!
//! `ExtractionAgent` wires the pieces owned by the sibling modules:
//! - `reader` pulls ordered records from the shard, resuming after the checkpoint.
//! - `dispatcher` admits records behind the back-pressure semaphore.
//! - `worker_pool` runs the extractor with per-item retries.
//! - `progress` owns the checkpoint and advances it over the contiguous terminal prefix.
//! - `lifecycle` holds run-scoped cancellation, fatal error capture, and the metrics reporter.

use super::backoff::{
    retry_with_backoff, RetryBackoff, RetryDisposition, CHECKPOINT_INITIAL_BACKOFF,
    CHECKPOINT_MAX_BACKOFF,
};
use super::dispatcher::{run_intake, Dispatcher, WorkItem};
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::progress::{
    progress_channel, FailureLog, FailureRecord, ProgressSnapshot, ProgressTracker,
    ProgressTrackerParams,
};
use super::reader::{StreamReader, StreamReaderParams};
use super::worker::{RetryPolicy, WorkerShared};
use super::worker_pool::WorkerPool;
use crate::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
use crate::extraction::{ArtifactStore, Extractor};
use crate::runtime::config::AgentConfig;
use crate::runtime::state::{ShardState, ShardStatus};
use crate::runtime::telemetry::Telemetry;
use crate::stream::circuit_breaker::StreamCircuitBreaker;
use crate::stream::client::{RpcStreamClient, StreamClient};
use crate::stream::record::ReadPosition;
use anyhow::{bail, Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ExtractionAgent {
    config: AgentConfig,
    extractor: Arc<dyn Extractor>,
    checkpoints: Arc<dyn CheckpointStore>,
    stream_client: Option<Arc<dyn StreamClient>>,
    breaker: Arc<StreamCircuitBreaker>,
    artifacts: Arc<ArtifactStore>,
    telemetry: Arc<Telemetry>,
    shard_status: Arc<ShardStatus>,
    failures: Arc<FailureLog>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    progress_rx: watch::Receiver<ProgressSnapshot>,
    shutdown_root: CancellationToken,
    worker_pool: WorkerPool,
    intake_handle: Option<JoinHandle<Result<()>>>,
    tracker_handle: Option<JoinHandle<Result<()>>>,
    lifecycle: Option<LifecycleHandles>,
    running: bool,
}

impl ExtractionAgent {
    /// Builds an agent that checkpoints into the configured volume and reads the shard
    /// through the JSON-RPC gateway client.
    pub fn new(config: AgentConfig, extractor: impl Extractor) -> Self {
        let checkpoints = Arc::new(FileCheckpointStore::new(
            config.checkpoint_volume(),
            config.stream_name(),
        ));
        Self::build(config, Arc::new(extractor), checkpoints, None)
    }

    /// Builds an agent over caller-provided stream client and checkpoint store.
    pub fn with_components(
        config: AgentConfig,
        extractor: Arc<dyn Extractor>,
        stream_client: Arc<dyn StreamClient>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::build(config, extractor, checkpoints, Some(stream_client))
    }

    fn build(
        config: AgentConfig,
        extractor: Arc<dyn Extractor>,
        checkpoints: Arc<dyn CheckpointStore>,
        stream_client: Option<Arc<dyn StreamClient>>,
    ) -> Self {
        let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::default());
        let artifacts = Arc::new(ArtifactStore::new(config.artifact_dir()));
        let worker_pool = WorkerPool::new(config.concurrency());
        Self {
            extractor,
            checkpoints,
            stream_client,
            breaker: Arc::new(StreamCircuitBreaker::default()),
            artifacts,
            telemetry: Arc::new(Telemetry::default()),
            shard_status: Arc::new(ShardStatus::default()),
            failures: Arc::new(FailureLog::default()),
            progress_tx,
            progress_rx,
            shutdown_root: CancellationToken::new(),
            worker_pool,
            intake_handle: None,
            tracker_handle: None,
            lifecycle: None,
            running: false,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn shard_state(&self) -> ShardState {
        self.shard_status.get()
    }

    /// Latest checkpoint/frontier/pending view published by the progress tracker.
    pub fn progress(&self) -> ProgressSnapshot {
        *self.progress_rx.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_rx.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        self.failures.recent()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Replaces the root shutdown token used to derive per-run cancellation tokens.
    /// Must only be called while the agent is stopped.
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            !self.running,
            "shutdown token should not change while the agent is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Reads the shard's checkpoint, retrying store failures like checkpoint writes do.
    async fn load_checkpoint(&self, shard_id: &str) -> Result<Option<Checkpoint>> {
        let store = &self.checkpoints;
        retry_with_backoff(
            RetryBackoff::new(CHECKPOINT_INITIAL_BACKOFF, CHECKPOINT_MAX_BACKOFF)
                .with_max_attempts(self.config.checkpoint_max_attempts())
                .with_cancellation(&self.shutdown_root),
            |_| store.load(shard_id),
            |attempt, backoff, err, will_retry| {
                tracing::warn!(
                    shard = shard_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    will_retry,
                    error = %err,
                    "checkpoint load failed"
                );
            },
            |_, _| RetryDisposition::Retry,
        )
        .await
        .with_context(|| format!("failed to load checkpoint for shard {shard_id}"))
    }

    /// Loads the checkpoint and starts intake, workers, and the progress tracker.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("extraction agent already running");
        }

        let shard_id = self.config.shard_id().to_owned();
        if !self.config.stream_verify() {
            tracing::warn!(
                endpoint = self.config.stream_endpoint(),
                "stream transport verification disabled; plaintext endpoints are accepted"
            );
        }

        let stream_client = match &self.stream_client {
            Some(client) => client.clone(),
            None => Arc::new(
                RpcStreamClient::from_config(&self.config, self.breaker.clone())
                    .context("failed to build stream client")?,
            ),
        };

        let checkpoint = self.load_checkpoint(&shard_id).await?;
        let resume_after = checkpoint.map(|checkpoint| checkpoint.sequence);
        let start_position = match resume_after {
            Some(sequence) => ReadPosition::after(sequence),
            None => self.config.initial_position().into(),
        };
        self.shard_status.reset(match resume_after {
            Some(_) => ShardState::Consuming,
            None => ShardState::NoCheckpoint,
        });

        tracing::info!(
            stream = self.config.stream_name(),
            shard = %shard_id,
            position = %start_position,
            concurrency = self.config.concurrency(),
            queue_depth = self.config.queue_depth(),
            "starting extraction agent"
        );

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            progress: self.progress_rx.clone(),
            activity: self.worker_pool.activity(),
            metrics_interval: self.config.metrics_interval(),
        });
        let fatal_handler = lifecycle.fatal_handler();
        let run_token = lifecycle.run_token.clone();

        let admission_capacity = self.config.admission_capacity();
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(self.config.queue_depth());
        let (event_tx, event_rx) =
            progress_channel(admission_capacity.saturating_mul(2).saturating_add(self.worker_pool.size()));

        let tracker = ProgressTracker::new(ProgressTrackerParams {
            shard_id: shard_id.clone(),
            store: self.checkpoints.clone(),
            resume_after,
            checkpoint_interval: self.config.checkpoint_interval(),
            checkpoint_max_attempts: self.config.checkpoint_max_attempts(),
            telemetry: self.telemetry.clone(),
            snapshot_tx: self.progress_tx.clone(),
            failures: self.failures.clone(),
            fatal_handler: fatal_handler.clone(),
        });
        self.tracker_handle = Some(tokio::spawn(tracker.run(event_rx)));

        self.worker_pool.launch(
            WorkerShared {
                work_rx: Arc::new(Mutex::new(work_rx)),
                extractor: self.extractor.clone(),
                artifacts: self.artifacts.clone(),
                progress_tx: event_tx.clone(),
                telemetry: self.telemetry.clone(),
                activity: self.worker_pool.activity(),
                policy: RetryPolicy::from_config(&self.config),
            },
            run_token.clone(),
            fatal_handler.clone(),
        );

        let reader = StreamReader::new(StreamReaderParams {
            client: stream_client,
            shard_id: shard_id.clone(),
            start: start_position,
            batch_size: self.config.read_batch_size(),
            poll_interval: self.config.poll_interval(),
            initial_backoff: self.config.read_initial_backoff(),
            max_backoff: self.config.read_max_backoff(),
            telemetry: self.telemetry.clone(),
            status: self.shard_status.clone(),
        });
        let dispatcher = Dispatcher::new(
            Arc::new(Semaphore::new(admission_capacity)),
            work_tx,
            event_tx,
            self.config.document_base_url().map(str::to_owned),
            self.telemetry.clone(),
        );
        self.intake_handle = Some(tokio::spawn(run_intake(
            reader,
            dispatcher,
            shard_id,
            self.shard_status.clone(),
            fatal_handler,
            run_token,
        )));

        self.lifecycle = Some(lifecycle);
        self.running = true;
        Ok(())
    }

    /// Stops intake, lets in-flight extractions finish, writes the final checkpoint, and
    /// returns the first fatal error of the run, if any.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        tracing::info!(shard = self.config.shard_id(), "stopping extraction agent");

        if let Some(handles) = &self.lifecycle {
            handles.run_token.cancel();
        }

        let mut pipeline_error: Option<anyhow::Error> = None;
        if let Some(handle) = self.intake_handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => pipeline_error = Some(err),
                Err(err) => {
                    tracing::error!(error = %err, "failed to join stream intake task");
                    pipeline_error = Some(err.into());
                }
            }
        }
        tracing::debug!("extraction agent stop: intake joined");

        let results = join_all(self.worker_pool.shutdown()).await;
        for (idx, result) in results.into_iter().enumerate() {
            if let Err(err) = result {
                tracing::warn!(worker = idx, error = %err, "worker task terminated unexpectedly");
            }
        }
        tracing::debug!("extraction agent stop: workers joined");

        if let Some(handle) = self.tracker_handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    pipeline_error.get_or_insert(err);
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to join progress tracker task");
                    pipeline_error.get_or_insert(err.into());
                }
            }
        }
        tracing::debug!("extraction agent stop: progress tracker flushed");

        let mut fatal_error = None;
        if let Some(handles) = self.lifecycle.take() {
            fatal_error = handles.error();
            handles.shutdown().await;
        }

        self.running = false;

        if let Some(err) = fatal_error.or(pipeline_error) {
            return Err(err).context("extraction pipeline aborted");
        }
        Ok(())
    }
}
