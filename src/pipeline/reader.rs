//! Stream Reader: resumes a shard strictly after its checkpoint and yields records in
//! sequence order, retrying transient read failures forever and halting on desync.

use super::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::runtime::state::ShardStatus;
use crate::runtime::telemetry::Telemetry;
use crate::stream::client::{StreamClient, StreamError};
use crate::stream::desync::{desync_from_error, validate_batch, StreamDesyncError};
use crate::stream::record::{ReadPosition, RecordBatch, StreamRecord};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub struct StreamReaderParams {
    pub client: Arc<dyn StreamClient>,
    pub shard_id: String,
    pub start: ReadPosition,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub telemetry: Arc<Telemetry>,
    pub status: Arc<ShardStatus>,
}

pub struct StreamReader {
    client: Arc<dyn StreamClient>,
    shard_id: String,
    position: ReadPosition,
    batch_size: usize,
    poll_interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    telemetry: Arc<Telemetry>,
    status: Arc<ShardStatus>,
}

impl StreamReader {
    pub fn new(params: StreamReaderParams) -> Self {
        Self {
            client: params.client,
            shard_id: params.shard_id,
            position: params.start,
            batch_size: params.batch_size.max(1),
            poll_interval: params.poll_interval,
            initial_backoff: params.initial_backoff,
            max_backoff: params.max_backoff,
            telemetry: params.telemetry,
            status: params.status,
        }
    }

    /// Cursor for the next read.
    pub fn position(&self) -> ReadPosition {
        self.position
    }

    /// Waits for the next non-empty batch. `Ok(None)` means shutdown was requested.
    pub async fn next_batch(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Vec<StreamRecord>>, StreamDesyncError> {
        loop {
            let Some(batch) = self.read_with_retry(shutdown).await? else {
                return Ok(None);
            };

            validate_batch(&self.position, &batch)?;
            self.status.mark_consuming();
            self.position = self.position.advance(&batch);

            if !batch.is_empty() {
                self.telemetry
                    .record_records_read(batch.records.len() as u64);
                tracing::debug!(
                    shard = %self.shard_id,
                    records = batch.records.len(),
                    position = %self.position,
                    "read batch"
                );
                return Ok(Some(batch.records));
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    /// Lazy record sequence over [`Self::next_batch`]. Ends on shutdown or after
    /// yielding a desync error.
    pub fn into_records(
        self,
        shutdown: CancellationToken,
    ) -> BoxStream<'static, Result<StreamRecord, StreamDesyncError>> {
        stream::unfold(
            (self, VecDeque::new(), false),
            move |(mut reader, mut buffered, halted)| {
                let shutdown = shutdown.clone();
                async move {
                    if halted {
                        return None;
                    }
                    loop {
                        if let Some(record) = buffered.pop_front() {
                            return Some((Ok(record), (reader, buffered, false)));
                        }
                        match reader.next_batch(&shutdown).await {
                            Ok(Some(records)) => buffered.extend(records),
                            Ok(None) => return None,
                            Err(desync) => return Some((Err(desync), (reader, buffered, true))),
                        }
                    }
                }
            },
        )
        .boxed()
    }

    async fn read_with_retry(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<RecordBatch>, StreamDesyncError> {
        let position = self.position;
        let batch_size = self.batch_size;
        let client = &self.client;
        let shard = self.shard_id.as_str();
        let telemetry = &self.telemetry;

        let read = retry_with_backoff(
            RetryBackoff::new(self.initial_backoff, self.max_backoff).with_cancellation(shutdown),
            |_| async move {
                client
                    .get_records(position, batch_size)
                    .await
                    .map_err(anyhow::Error::from)
            },
            |attempt, backoff, err, _| {
                telemetry.record_stream_read_error();
                tracing::warn!(
                    shard,
                    position = %position,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "stream read failed; retrying"
                );
            },
            |_, err| match err.downcast_ref::<StreamError>() {
                Some(stream_err) if stream_err.is_desync() => RetryDisposition::Abort,
                _ => RetryDisposition::Retry,
            },
        );

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            outcome = read => outcome,
        };

        match outcome {
            Ok(batch) => Ok(Some(batch)),
            Err(err) => match err
                .downcast_ref::<StreamError>()
                .and_then(|stream_err| desync_from_error(stream_err, &position, shard))
            {
                Some(desync) => Err(desync),
                // Without an attempt limit the only other exit is cancellation.
                None => Ok(None),
            },
        }
    }
}
