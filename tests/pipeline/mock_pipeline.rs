use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    checkpoints::FlakyCheckpointStore,
    extractors::{artifact_for, GatedExtractor, ScriptedExtractor, Step},
    helpers::{
        document_records, init_tracing, wait_for_checkpoint, wait_for_progress, wait_until,
        TestDirs, SHARD, STREAM,
    },
    shard::MockShard,
};
use anyhow::Result;
use pdfstream::{
    AgentConfigBuilder, ArtifactStore, CheckpointStore, DocumentId, ExtractionAgent, Extractor,
    FileCheckpointStore, InitialPosition, MemoryCheckpointStore, ShardState, StreamDesyncError,
};
use tokio::time::sleep;

const ENDPOINT: &str = "http://127.0.0.1:9";

fn agent_over(
    config: AgentConfigBuilder,
    extractor: impl Extractor,
    shard: &MockShard,
    store: Arc<dyn CheckpointStore>,
) -> Result<ExtractionAgent> {
    Ok(ExtractionAgent::with_components(
        config.build()?,
        Arc::new(extractor),
        Arc::new(shard.clone()),
        store,
    ))
}

fn desync_in_chain(err: &anyhow::Error) -> Option<&StreamDesyncError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StreamDesyncError>())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permanent_failure_does_not_block_checkpoint() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 3));
    let extractor = ScriptedExtractor::new().script("doc-2", &[Step::Permanent]);
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT),
        extractor.clone(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 3, Duration::from_secs(5)).await?;
    agent.stop().await?;

    assert_eq!(store.get(SHARD).map(|checkpoint| checkpoint.sequence), Some(3));
    assert_eq!(extractor.attempts("doc-2"), 1, "permanent failures are not retried");

    let failures = agent.recent_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sequence, 2);
    assert_eq!(failures[0].document_id.as_deref(), Some("doc-2"));
    assert_eq!(failures[0].attempts, 1);

    let telemetry = agent.telemetry().snapshot();
    assert_eq!(telemetry.extractions_succeeded, 2);
    assert_eq!(telemetry.permanent_failures, 1);

    for id in ["doc-1", "doc-3"] {
        let path = dirs.artifacts.path().join(format!("{id}.json"));
        assert!(path.exists(), "artifact for {id} missing at {}", path.display());
    }
    assert!(!dirs.artifacts.path().join("doc-2.json").exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn extraction_timeouts_are_retried_until_success() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 2));
    let extractor = ScriptedExtractor::new().script("doc-1", &[Step::Hang, Step::Hang]);
    let store = Arc::new(MemoryCheckpointStore::new());

    let config = dirs
        .config(ENDPOINT)
        .max_attempts(3)
        .extraction_timeout(Duration::from_millis(100));
    let mut agent = agent_over(config, extractor.clone(), &shard, store.clone())?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 2, Duration::from_secs(5)).await?;
    agent.stop().await?;

    assert_eq!(extractor.attempts("doc-1"), 3);
    assert!(agent.recent_failures().is_empty());
    let telemetry = agent.telemetry().snapshot();
    assert_eq!(telemetry.extraction_timeouts, 2);
    assert_eq!(telemetry.extractions_succeeded, 2);
    assert_eq!(telemetry.permanent_failures, 0);
    assert_eq!(telemetry.documents_processed, 2);
    assert!(
        telemetry.processing_ms_max >= 200,
        "processing time must cover both timed-out attempts, got {}ms",
        telemetry.processing_ms_max
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_retries_become_permanent_failures() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 2));
    let extractor = ScriptedExtractor::new().script(
        "doc-1",
        &[Step::Transient, Step::Transient, Step::Transient, Step::Succeed],
    );
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT).max_attempts(3),
        extractor.clone(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 2, Duration::from_secs(5)).await?;
    agent.stop().await?;

    assert_eq!(extractor.attempts("doc-1"), 3, "attempts are capped at max_attempts");
    let failures = agent.recent_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sequence, 1);
    assert_eq!(failures[0].attempts, 3);
    assert!(failures[0].error.contains("retries exhausted"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_stream_errors_are_retried() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 4));
    shard.fail_next_reads(5);
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT),
        ScriptedExtractor::new(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 4, Duration::from_secs(5)).await?;
    agent.stop().await?;

    assert!(shard.reads() >= 6, "expected retries, saw {} reads", shard.reads());
    assert!(agent.telemetry().snapshot().stream_read_errors >= 5);
    assert_eq!(agent.shard_state(), ShardState::Consuming);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn latest_origin_on_empty_shard_reads_later_appends() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(Vec::new());
    let extractor = ScriptedExtractor::new();
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT).initial_position(InitialPosition::Latest),
        extractor.clone(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_until("a few empty polls", Duration::from_secs(5), || shard.reads() >= 3).await?;

    shard.append(document_records(1, 3));
    wait_for_checkpoint(&agent, 3, Duration::from_secs(5)).await?;
    agent.stop().await?;

    let mut completed = extractor.completed();
    completed.sort();
    assert_eq!(completed, ["doc-1", "doc-2", "doc-3"]);
    assert_eq!(store.get(SHARD).map(|checkpoint| checkpoint.sequence), Some(3));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn latest_origin_skips_backlog_but_reads_new_records() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 3));
    let extractor = ScriptedExtractor::new();
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT).initial_position(InitialPosition::Latest),
        extractor.clone(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_until("the cursor to pin the tip", Duration::from_secs(5), || {
        shard.reads() >= 2
    })
    .await?;

    shard.append(document_records(4, 5));
    wait_for_checkpoint(&agent, 5, Duration::from_secs(5)).await?;
    agent.stop().await?;

    let mut completed = extractor.completed();
    completed.sort();
    assert_eq!(completed, ["doc-4", "doc-5"], "the backlog before startup is skipped");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checkpoint_load_failures_are_retried_at_startup() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 4));
    let store = FlakyCheckpointStore::new(MemoryCheckpointStore::with_checkpoint(SHARD, 2));
    store.fail_next_loads(2);
    let extractor = ScriptedExtractor::new();

    let mut agent = agent_over(
        dirs.config(ENDPOINT).checkpoint_max_attempts(5),
        extractor.clone(),
        &shard,
        Arc::new(store.clone()),
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 4, Duration::from_secs(5)).await?;
    agent.stop().await?;

    assert_eq!(store.failed_loads(), 2);
    let mut completed = extractor.completed();
    completed.sort();
    assert_eq!(completed, ["doc-3", "doc-4"], "resume must start after the loaded checkpoint");
    assert_eq!(store.stored(SHARD), Some(4));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checkpoint_load_gives_up_after_max_attempts() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 2));
    let store = FlakyCheckpointStore::new(MemoryCheckpointStore::new());
    store.fail_next_loads(10);

    let mut agent = agent_over(
        dirs.config(ENDPOINT).checkpoint_max_attempts(3),
        ScriptedExtractor::new(),
        &shard,
        Arc::new(store.clone()),
    )?;
    let err = agent
        .start()
        .await
        .expect_err("an unreadable checkpoint volume must abort startup");

    assert!(format!("{err:#}").contains("failed to load checkpoint for shard"));
    assert_eq!(store.failed_loads(), 3);
    assert!(!agent.is_running());
    assert_eq!(shard.reads(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_resumes_after_checkpoint_and_redelivers_unfinished() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 6));
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(dirs.checkpoints.path(), STREAM));

    // doc-3 keeps timing out, so the first run can never move past 2.
    let first = ScriptedExtractor::new().script("doc-3", &[Step::Hang; 50]);
    let config = dirs
        .config(ENDPOINT)
        .max_attempts(50)
        .extraction_timeout(Duration::from_millis(100));
    let mut agent = agent_over(config.clone(), first.clone(), &shard, store.clone())?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 2, Duration::from_secs(5)).await?;
    wait_until("doc-3 attempted", Duration::from_secs(5), || {
        first.attempts("doc-3") >= 1
    })
    .await?;
    agent.stop().await?;

    let persisted = store.load(SHARD).await?.map(|checkpoint| checkpoint.sequence);
    assert_eq!(persisted, Some(2), "checkpoint must stop before the unfinished item");
    assert_eq!(agent.shard_state(), ShardState::Consuming);

    let second = ScriptedExtractor::new();
    let mut agent = agent_over(config, second.clone(), &shard, store.clone())?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 6, Duration::from_secs(5)).await?;
    agent.stop().await?;

    let redelivered = second.completed();
    assert!(redelivered.contains(&"doc-3".to_owned()));
    assert!(
        !redelivered.contains(&"doc-1".to_owned()) && !redelivered.contains(&"doc-2".to_owned()),
        "checkpointed records must not be redelivered, got {redelivered:?}"
    );
    let persisted = store.load(SHARD).await?.map(|checkpoint| checkpoint.sequence);
    assert_eq!(persisted, Some(6));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn back_pressure_bounds_the_pending_window() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 20));
    let extractor = GatedExtractor::closed();
    let store = Arc::new(MemoryCheckpointStore::new());

    let config = dirs
        .config(ENDPOINT)
        .concurrency(2)
        .queue_depth(3)
        .extraction_timeout(Duration::from_secs(30));
    let mut agent = agent_over(config, extractor.clone(), &shard, store.clone())?;
    agent.start().await?;

    wait_for_progress(&agent, "a full window", Duration::from_secs(5), |snapshot| {
        snapshot.pending == 5
    })
    .await?;
    sleep(Duration::from_millis(200)).await;

    let snapshot = agent.progress();
    assert_eq!(snapshot.pending, 5, "pending window must stay at concurrency + queue depth");
    assert_eq!(snapshot.checkpointed, None);
    assert_eq!(extractor.in_flight(), 2);
    assert_eq!(agent.telemetry().snapshot().records_dispatched, 5);

    extractor.open();
    wait_for_checkpoint(&agent, 20, Duration::from_secs(5)).await?;
    agent.stop().await?;

    assert!(extractor.max_in_flight() <= 2);
    assert_eq!(extractor.started(), 20);
    assert_eq!(agent.progress().pending, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_checkpoint_requires_operator_intervention() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 12));
    shard.trim_before(10);
    let extractor = ScriptedExtractor::new();
    let store = Arc::new(MemoryCheckpointStore::with_checkpoint(SHARD, 3));

    let mut agent = agent_over(
        dirs.config(ENDPOINT),
        extractor.clone(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_until("operator intervention", Duration::from_secs(5), || {
        agent.shard_state() == ShardState::OperatorIntervention
    })
    .await?;

    let err = agent
        .stop()
        .await
        .expect_err("desync should surface from stop");
    assert!(format!("{err:#}").contains("extraction pipeline aborted"));
    assert!(matches!(
        desync_in_chain(&err),
        Some(StreamDesyncError::PositionExpired {
            checkpoint: 3,
            oldest: Some(10)
        })
    ));

    assert_eq!(store.get(SHARD).map(|checkpoint| checkpoint.sequence), Some(3));
    assert!(extractor.completed().is_empty(), "no record past a desync may be processed");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequence_gap_halts_consumption() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let mut records = document_records(1, 2);
    records.extend(document_records(4, 5));
    let shard = MockShard::new(records);
    let extractor = ScriptedExtractor::new();
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT),
        extractor.clone(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_until("operator intervention", Duration::from_secs(5), || {
        agent.shard_state() == ShardState::OperatorIntervention
    })
    .await?;

    let err = agent.stop().await.expect_err("gap should be fatal");
    assert!(matches!(
        desync_in_chain(&err),
        Some(StreamDesyncError::Gap {
            after: 2,
            expected: 3,
            found: 4
        })
    ));
    assert!(store.get(SHARD).is_none());
    assert!(extractor.completed().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checkpoint_write_failures_are_retried() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 3));
    let store = FlakyCheckpointStore::new(MemoryCheckpointStore::new());
    store.fail_next_saves(2);

    let mut agent = agent_over(
        dirs.config(ENDPOINT).checkpoint_max_attempts(5),
        ScriptedExtractor::new(),
        &shard,
        Arc::new(store.clone()),
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 3, Duration::from_secs(5)).await?;
    agent.stop().await?;

    assert_eq!(store.failed_saves(), 2);
    assert_eq!(store.stored(SHARD), Some(3));
    assert!(agent.telemetry().snapshot().checkpoint_write_failures >= 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_payload_is_a_permanent_failure() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let mut records = document_records(1, 3);
    records[1].data = b"{\"document_id\": \"../etc/passwd\"}".to_vec().into();
    let shard = MockShard::new(records);
    let extractor = ScriptedExtractor::new();
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT),
        extractor.clone(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 3, Duration::from_secs(5)).await?;
    agent.stop().await?;

    let failures = agent.recent_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sequence, 2);
    assert_eq!(failures[0].document_id, None);
    assert_eq!(failures[0].attempts, 0);
    let mut completed = extractor.completed();
    completed.sort();
    assert_eq!(completed, ["doc-1", "doc-3"]);
    assert_eq!(agent.telemetry().snapshot().documents_processed, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn artifacts_are_replaced_on_redelivery() -> Result<()> {
    init_tracing();
    let dirs = TestDirs::new()?;
    let shard = MockShard::new(document_records(1, 1));
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut agent = agent_over(
        dirs.config(ENDPOINT),
        ScriptedExtractor::new(),
        &shard,
        store.clone(),
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 1, Duration::from_secs(5)).await?;
    agent.stop().await?;

    // A crash before the checkpoint write would replay the record from scratch.
    let replay_store = Arc::new(MemoryCheckpointStore::new());
    let mut agent = agent_over(
        dirs.config(ENDPOINT),
        ScriptedExtractor::new(),
        &shard,
        replay_store,
    )?;
    agent.start().await?;
    wait_for_checkpoint(&agent, 1, Duration::from_secs(5)).await?;
    agent.stop().await?;

    let artifacts = ArtifactStore::new(dirs.artifacts.path());
    let id = DocumentId::parse("doc-1")?;
    let contents = artifacts.read(&id).await?.expect("artifact present");
    assert_eq!(contents, artifact_for("doc-1"));

    let leftovers: Vec<_> = std::fs::read_dir(dirs.artifacts.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temporary artifact files left behind");
    Ok(())
}
