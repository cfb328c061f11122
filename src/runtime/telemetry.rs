use crate::pipeline::progress::ProgressSnapshot;
use crate::pipeline::worker::WorkerActivityTracker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by the reader, dispatcher, workers and progress tracker.
#[derive(Default, Debug)]
pub struct Telemetry {
    records_read: AtomicU64,
    records_dispatched: AtomicU64,
    extractions_succeeded: AtomicU64,
    permanent_failures: AtomicU64,
    transient_failures: AtomicU64,
    extraction_timeouts: AtomicU64,
    stream_read_errors: AtomicU64,
    checkpoint_writes: AtomicU64,
    checkpoint_write_failures: AtomicU64,
    documents_processed: AtomicU64,
    processing_ms_total: AtomicU64,
    processing_ms_max: AtomicU64,
}

impl Telemetry {
    pub fn record_records_read(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.records_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.records_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.extractions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permanent_failure(&self) {
        self.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transient_failure(&self) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Timeouts are transient failures too.
    pub fn record_extraction_timeout(&self) {
        self.extraction_timeouts.fetch_add(1, Ordering::Relaxed);
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_read_error(&self) {
        self.stream_read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_write(&self) {
        self.checkpoint_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_write_failure(&self) {
        self.checkpoint_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Admission-to-terminal time of one extracted document.
    pub fn record_processing_duration(&self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.processing_ms_total.fetch_add(millis, Ordering::Relaxed);
        self.processing_ms_max.fetch_max(millis, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            records_read: self.records_read.load(Ordering::Relaxed),
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            extractions_succeeded: self.extractions_succeeded.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            extraction_timeouts: self.extraction_timeouts.load(Ordering::Relaxed),
            stream_read_errors: self.stream_read_errors.load(Ordering::Relaxed),
            checkpoint_writes: self.checkpoint_writes.load(Ordering::Relaxed),
            checkpoint_write_failures: self.checkpoint_write_failures.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            processing_ms_total: self.processing_ms_total.load(Ordering::Relaxed),
            processing_ms_max: self.processing_ms_max.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub records_read: u64,
    pub records_dispatched: u64,
    pub extractions_succeeded: u64,
    pub permanent_failures: u64,
    pub transient_failures: u64,
    pub extraction_timeouts: u64,
    pub stream_read_errors: u64,
    pub checkpoint_writes: u64,
    pub checkpoint_write_failures: u64,
    pub documents_processed: u64,
    pub processing_ms_total: u64,
    pub processing_ms_max: u64,
}

impl TelemetrySnapshot {
    pub fn terminal(&self) -> u64 {
        self.extractions_succeeded
            .saturating_add(self.permanent_failures)
    }

    /// Mean processing time of the documents finished since `earlier`, if any were.
    pub fn mean_processing_ms_since(&self, earlier: &TelemetrySnapshot) -> Option<u64> {
        let documents = self
            .documents_processed
            .saturating_sub(earlier.documents_processed);
        if documents == 0 {
            return None;
        }
        Some(
            self.processing_ms_total
                .saturating_sub(earlier.processing_ms_total)
                / documents,
        )
    }
}

/// Spawns a background task that periodically logs throughput, per-document processing
/// time, the pending window, checkpoint position, and failure counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    progress: watch::Receiver<ProgressSnapshot>,
    activity: Arc<WorkerActivityTracker>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "pdfstream::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let terminal_delta = current_snapshot
                        .terminal()
                        .saturating_sub(last_snapshot.terminal());
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        terminal_delta as f64 / elapsed
                    };
                    let window = *progress.borrow();
                    let mean_processing_ms =
                        current_snapshot.mean_processing_ms_since(&last_snapshot);

                    tracing::info!(
                        target: "pdfstream::metrics",
                        throughput = format!("{throughput:.2}"),
                        read = current_snapshot.records_read,
                        dispatched = current_snapshot.records_dispatched,
                        succeeded = current_snapshot.extractions_succeeded,
                        permanent_failures = current_snapshot.permanent_failures,
                        transient_failures = current_snapshot.transient_failures,
                        extraction_timeouts = current_snapshot.extraction_timeouts,
                        stream_read_errors = current_snapshot.stream_read_errors,
                        checkpoint_writes = current_snapshot.checkpoint_writes,
                        checkpoint_write_failures = current_snapshot.checkpoint_write_failures,
                        mean_processing_ms = ?mean_processing_ms,
                        max_processing_ms = current_snapshot.processing_ms_max,
                        in_flight = activity.active(),
                        pending = window.pending,
                        frontier = ?window.frontier,
                        checkpointed = ?window.checkpointed,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
