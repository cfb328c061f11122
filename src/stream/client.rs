//! Stream gateway client: the `StreamClient` trait consumed by the reader and its
//! JSON-RPC implementation with breaker gating, metrics, and bounded retries.

use crate::pipeline::backoff::backoff_for_attempt;
use crate::runtime::config::AgentConfig;
use crate::stream::auth::build_bearer_headers;
use crate::stream::circuit_breaker::{CircuitBreakerError, StreamCircuitBreaker};
use crate::stream::metrics::{StreamMetrics, StreamMetricsSnapshot};
use crate::stream::options::StreamClientOptions;
use crate::stream::record::{ReadPosition, RecordBatch, StreamRecord};
use crate::stream::retry::{RetryContext, GET_RECORDS_RETRY};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{sleep, timeout, Instant};

pub const GET_RECORDS_METHOD: &str = "getrecords";
pub const EXPIRED_POSITION_CODE: i32 = -32010;
pub const SHARD_NOT_FOUND_CODE: i32 = -32011;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("stream method {method} timed out")]
    Timeout { method: &'static str },
    #[error("stream circuit breaker is open")]
    CircuitOpen,
    #[error("read position expired: {message}")]
    ExpiredPosition { message: String },
    #[error("shard {shard} not found")]
    ShardNotFound { shard: String },
    #[error("stream transport failure: {0}")]
    Transport(String),
    #[error("malformed stream response: {0}")]
    Malformed(String),
}

impl StreamError {
    /// The gateway answered, but the cursor itself is unusable.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            StreamError::ExpiredPosition { .. } | StreamError::ShardNotFound { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout { .. })
    }
}

impl From<CircuitBreakerError> for StreamError {
    fn from(_: CircuitBreakerError) -> Self {
        StreamError::CircuitOpen
    }
}

/// Ordered source of records for one shard.
pub trait StreamClient: Send + Sync {
    /// Reads up to `limit` records starting at `position`.
    fn get_records<'a>(
        &'a self,
        position: ReadPosition,
        limit: usize,
    ) -> BoxFuture<'a, Result<RecordBatch, StreamError>>;
}

#[derive(Debug, Clone)]
pub struct RpcStreamClient {
    endpoint: Arc<String>,
    stream: Arc<String>,
    shard_id: Arc<String>,
    client: HttpClient,
    options: StreamClientOptions,
    metrics: Arc<StreamMetrics>,
    breaker: Arc<StreamCircuitBreaker>,
}

impl StreamClient for RpcStreamClient {
    fn get_records<'a>(
        &'a self,
        position: ReadPosition,
        limit: usize,
    ) -> BoxFuture<'a, Result<RecordBatch, StreamError>> {
        Box::pin(self.get_records(position, limit))
    }
}

#[derive(Debug, Deserialize)]
struct WireBatch {
    #[serde(default)]
    records: Vec<WireRecord>,
    #[serde(default)]
    trim_horizon: Option<u64>,
    #[serde(default)]
    latest: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    sequence: u64,
    #[serde(default)]
    partition_key: String,
    data: String,
    #[serde(default)]
    arrival_ms: u64,
}

impl WireBatch {
    fn into_batch(self) -> Result<RecordBatch, StreamError> {
        let records = self
            .records
            .into_iter()
            .map(|record| {
                let data = BASE64_STANDARD.decode(record.data.as_bytes()).map_err(|err| {
                    StreamError::Malformed(format!(
                        "record {} data is not valid base64: {err}",
                        record.sequence
                    ))
                })?;
                Ok(StreamRecord {
                    sequence: record.sequence,
                    partition_key: record.partition_key,
                    data: Bytes::from(data),
                    arrival_ms: record.arrival_ms,
                })
            })
            .collect::<Result<Vec<_>, StreamError>>()?;

        Ok(RecordBatch {
            records,
            trim_horizon: self.trim_horizon,
            latest: self.latest,
        })
    }
}

impl RpcStreamClient {
    pub fn new(
        endpoint: impl Into<String>,
        stream: impl Into<String>,
        shard_id: impl Into<String>,
        token: Option<&str>,
    ) -> Result<Self> {
        Self::with_options_and_breaker(
            endpoint,
            stream,
            shard_id,
            token,
            StreamClientOptions::default(),
            Arc::new(StreamCircuitBreaker::default()),
        )
    }

    pub fn with_options_and_breaker(
        endpoint: impl Into<String>,
        stream: impl Into<String>,
        shard_id: impl Into<String>,
        token: Option<&str>,
        options: StreamClientOptions,
        breaker: Arc<StreamCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;

        let endpoint = endpoint.into();
        let headers = build_bearer_headers(token)?;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_response_size(max_response_body_size)
            .build(&endpoint)
            .map_err(|err| anyhow!("failed to build stream client: {err}"))?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            stream: Arc::new(stream.into()),
            shard_id: Arc::new(shard_id.into()),
            client,
            options,
            metrics: Arc::new(StreamMetrics::default()),
            breaker,
        })
    }

    pub fn from_config(config: &AgentConfig, breaker: Arc<StreamCircuitBreaker>) -> Result<Self> {
        let options = StreamClientOptions {
            request_timeout: config.stream_timeout(),
            ..StreamClientOptions::default()
        };
        Self::with_options_and_breaker(
            config.stream_endpoint().to_owned(),
            config.stream_name().to_owned(),
            config.shard_id().to_owned(),
            config.stream_token(),
            options,
            breaker,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn metrics(&self) -> StreamMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub async fn get_records(
        &self,
        position: ReadPosition,
        limit: usize,
    ) -> Result<RecordBatch, StreamError> {
        let context = RetryContext::new(&GET_RECORDS_RETRY, &self.shard_id, position);
        self.retry_with_breaker(
            context,
            || self.fetch_once(position, limit),
            |attempt, batch: &RecordBatch, latency| {
                self.metrics.record_success(latency, batch.records.len());
                tracing::debug!(
                    attempt,
                    records = batch.records.len(),
                    latest = ?batch.latest,
                    "getrecords completed successfully"
                );
            },
        )
        .await
    }

    /// Breaker-gated retry loop with exponential backoff. Desync answers are returned
    /// immediately since retrying cannot repair the cursor.
    async fn retry_with_breaker<T, F, Fut, S>(
        &self,
        context: RetryContext<'_>,
        mut operation: F,
        mut on_success: S,
    ) -> Result<T, StreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StreamError>>,
        S: FnMut(usize, &T, Duration),
    {
        let mut attempt = 0;

        loop {
            match self.breaker.before_request() {
                Ok(state) => context.log_permit(state),
                Err(err) => {
                    context.log_circuit_open();
                    return Err(err.into());
                }
            }

            attempt += 1;
            let start = Instant::now();

            match operation().await {
                Ok(value) => {
                    self.breaker.record_success();
                    on_success(attempt, &value, start.elapsed());
                    return Ok(value);
                }
                Err(err) if err.is_desync() => {
                    self.metrics.record_failure(start.elapsed());
                    self.breaker.record_success();
                    context.log_desync(attempt, &err);
                    return Err(err);
                }
                Err(err) => {
                    let elapsed = start.elapsed();
                    if err.is_timeout() {
                        self.metrics.record_timeout(elapsed);
                    } else {
                        self.metrics.record_failure(elapsed);
                    }
                    self.breaker.record_failure();

                    if attempt >= self.options.max_attempts {
                        context.log_exhausted(attempt, &err);
                        return Err(err);
                    }

                    let backoff = backoff_for_attempt(
                        self.options.initial_backoff,
                        self.options.max_backoff,
                        attempt,
                    );
                    if err.is_timeout() {
                        context.log_timeout(attempt, backoff);
                    } else {
                        context.log_retry(attempt, backoff, &err);
                    }
                    sleep(backoff).await;
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        position: ReadPosition,
        limit: usize,
    ) -> Result<RecordBatch, StreamError> {
        let params = rpc_params![self.stream.as_str(), self.shard_id.as_str(), position, limit];
        let response: WireBatch = timeout(
            self.options.request_timeout,
            self.client.request(GET_RECORDS_METHOD, params),
        )
        .await
        .map_err(|_| StreamError::Timeout {
            method: GET_RECORDS_METHOD,
        })?
        .map_err(|err| map_rpc_error(GET_RECORDS_METHOD, &self.shard_id, err))?;

        response.into_batch()
    }
}

fn map_rpc_error(method: &'static str, shard: &str, err: JsonRpcError) -> StreamError {
    match err {
        JsonRpcError::Call(call) => match call.code() {
            EXPIRED_POSITION_CODE => StreamError::ExpiredPosition {
                message: call.message().to_owned(),
            },
            SHARD_NOT_FOUND_CODE => StreamError::ShardNotFound {
                shard: shard.to_owned(),
            },
            code => StreamError::Transport(format!(
                "rpc {method} call failed (code={code}, message={})",
                call.message()
            )),
        },
        JsonRpcError::RequestTimeout => StreamError::Timeout { method },
        JsonRpcError::ParseError(err) => {
            StreamError::Malformed(format!("rpc {method} returned an unexpected payload: {err}"))
        }
        other => StreamError::Transport(format!("rpc {method} call failed: {other}")),
    }
}
