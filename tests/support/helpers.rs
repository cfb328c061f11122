use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use pdfstream::{AgentConfigBuilder, ExtractionAgent, ProgressSnapshot, StreamRecord};
use tempfile::TempDir;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

pub const SHARD: &str = "shard-0";
pub const STREAM: &str = "PDFIsAvailable";

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Scratch checkpoint volume and artifact directory, removed on drop.
pub struct TestDirs {
    pub checkpoints: TempDir,
    pub artifacts: TempDir,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        Ok(Self {
            checkpoints: TempDir::new()?,
            artifacts: TempDir::new()?,
        })
    }

    /// Builder with short timers so scenarios finish in well under a second of waiting.
    pub fn config(&self, endpoint: &str) -> AgentConfigBuilder {
        AgentConfigBuilder::default()
            .stream_name(STREAM)
            .shard_id(SHARD)
            .stream_endpoint(endpoint)
            .stream_verify(false)
            .checkpoint_volume(self.checkpoints.path())
            .artifact_dir(self.artifacts.path())
            .concurrency(2)
            .queue_depth(2)
            .max_attempts(3)
            .extraction_timeout(Duration::from_millis(200))
            .retry_initial_backoff(Duration::from_millis(10))
            .retry_max_backoff(Duration::from_millis(40))
            .read_batch_size(16)
            .poll_interval(Duration::from_millis(20))
            .stream_timeout(Duration::from_secs(2))
            .read_initial_backoff(Duration::from_millis(10))
            .read_max_backoff(Duration::from_millis(40))
            .checkpoint_interval(Duration::from_millis(50))
            .metrics_interval(Duration::from_secs(1))
    }
}

pub fn document_record(sequence: u64, document_id: &str) -> StreamRecord {
    StreamRecord {
        sequence,
        partition_key: document_id.to_owned(),
        data: serde_json::to_vec(&serde_json::json!({ "document_id": document_id }))
            .unwrap_or_default()
            .into(),
        arrival_ms: 1_700_000_000_000 + sequence,
    }
}

/// Records `first..=last` announcing documents `doc-{sequence}`.
pub fn document_records(first: u64, last: u64) -> Vec<StreamRecord> {
    (first..=last)
        .map(|sequence| document_record(sequence, &format!("doc-{sequence}")))
        .collect()
}

pub async fn wait_for_progress<F>(
    agent: &ExtractionAgent,
    description: &str,
    timeout: Duration,
    mut predicate: F,
) -> Result<ProgressSnapshot>
where
    F: FnMut(&ProgressSnapshot) -> bool,
{
    let start = Instant::now();
    loop {
        let snapshot = agent.progress();
        if predicate(&snapshot) {
            return Ok(snapshot);
        }
        if start.elapsed() > timeout {
            bail!("agent did not reach {description} within {timeout:?} (last: {snapshot:?})");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_checkpoint(
    agent: &ExtractionAgent,
    target: u64,
    timeout: Duration,
) -> Result<ProgressSnapshot> {
    wait_for_progress(agent, &format!("checkpoint {target}"), timeout, |snapshot| {
        snapshot.checkpointed.is_some_and(|checkpointed| checkpointed >= target)
    })
    .await
}

pub async fn wait_until<F>(description: &str, timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{description} did not happen within {timeout:?}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}
