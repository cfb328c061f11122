//! Dispatcher: turns records into work items in shard order behind the admission
//! semaphore, so at most `concurrency + queue_depth` items are ever unresolved.

use super::progress::{ProgressEvent, ProgressSender};
use super::reader::StreamReader;
use crate::extraction::{decode_document, DocumentId, ExtractionOutcome, ExtractionResult};
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::state::ShardStatus;
use crate::runtime::telemetry::Telemetry;
use crate::stream::record::StreamRecord;
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One record on its way through the worker pool. Dropping it releases its admission slot.
#[derive(Debug)]
pub struct WorkItem {
    pub record: StreamRecord,
    pub document_id: DocumentId,
    pub locator: String,
    pub attempts: usize,
    pub first_seen: Instant,
    _permit: OwnedSemaphorePermit,
}

impl WorkItem {
    pub(crate) fn new(
        record: StreamRecord,
        document_id: DocumentId,
        locator: String,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            record,
            document_id,
            locator,
            attempts: 0,
            first_seen: Instant::now(),
            _permit: permit,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.record.sequence
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Submitted,
    /// Undecodable payload, recorded as a permanent failure.
    Rejected,
    Shutdown,
}

pub(crate) struct Dispatcher {
    admission: Arc<Semaphore>,
    work_tx: mpsc::Sender<WorkItem>,
    progress_tx: ProgressSender,
    document_base_url: Option<String>,
    telemetry: Arc<Telemetry>,
}

impl Dispatcher {
    pub(crate) fn new(
        admission: Arc<Semaphore>,
        work_tx: mpsc::Sender<WorkItem>,
        progress_tx: ProgressSender,
        document_base_url: Option<String>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            admission,
            work_tx,
            progress_tx,
            document_base_url,
            telemetry,
        }
    }

    /// Suspends until an admission slot is free, registers the record with the progress
    /// tracker, then hands it to the worker queue.
    pub(crate) async fn dispatch(
        &self,
        record: StreamRecord,
        shutdown: &CancellationToken,
    ) -> Result<DispatchOutcome> {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(DispatchOutcome::Shutdown),
            permit = self.admission.clone().acquire_owned() => {
                permit.context("admission semaphore closed")?
            }
        };

        let sequence = record.sequence;
        self.progress_tx
            .send(ProgressEvent::Dispatched { sequence })
            .await
            .map_err(|_| anyhow!("progress tracker stopped"))?;
        self.telemetry.record_dispatched();

        let document = match decode_document(&record.data, self.document_base_url.as_deref()) {
            Ok(document) => document,
            Err(err) => {
                self.progress_tx
                    .send(ProgressEvent::Completed(ExtractionResult {
                        sequence,
                        document_id: None,
                        attempts: 0,
                        elapsed: Duration::ZERO,
                        outcome: ExtractionOutcome::PermanentFailure {
                            error: err.to_string(),
                        },
                    }))
                    .await
                    .map_err(|_| anyhow!("progress tracker stopped"))?;
                drop(permit);
                return Ok(DispatchOutcome::Rejected);
            }
        };

        let item = WorkItem::new(record, document.id, document.locator, permit);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(DispatchOutcome::Shutdown),
            sent = self.work_tx.send(item) => {
                sent.map_err(|_| anyhow!("worker pool stopped"))?;
                Ok(DispatchOutcome::Submitted)
            }
        }
    }
}

/// Reader and dispatcher share one sequential task per shard.
pub(crate) async fn run_intake(
    reader: StreamReader,
    dispatcher: Dispatcher,
    shard_id: String,
    status: Arc<ShardStatus>,
    fatal_handler: Arc<FatalErrorHandler>,
    shutdown: CancellationToken,
) -> Result<()> {
    tracing::info!(shard = %shard_id, position = %reader.position(), "stream intake started");
    let mut records = reader.into_records(shutdown.clone());

    while let Some(next) = records.next().await {
        match next {
            Ok(record) => match dispatcher.dispatch(record, &shutdown).await {
                Ok(DispatchOutcome::Shutdown) => break,
                Ok(_) => {}
                Err(_) if shutdown.is_cancelled() => break,
                Err(err) => return Err(err),
            },
            Err(desync) => {
                status.mark_desynchronized();
                return Err(fatal_handler.trigger_desync(&shard_id, desync));
            }
        }
    }

    tracing::info!(shard = %shard_id, "stream intake stopped");
    Ok(())
}
