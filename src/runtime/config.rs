use crate::runtime::telemetry;
use crate::stream::record::InitialPosition;
use anyhow::{anyhow, bail, Context, Result};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_STREAM_NAME: &str = "PDFIsAvailable";
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_BACKOFF_MS: u64 = 60_000;
const DEFAULT_READ_BATCH_SIZE: usize = 100;
const MAX_READ_BATCH_SIZE: usize = 10_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_READ_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_CHECKPOINT_MAX_ATTEMPTS: usize = 5;

pub const ENV_STREAM_NAME: &str = "PDFSTREAM_STREAM_NAME";
pub const ENV_SHARD_ID: &str = "PDFSTREAM_SHARD_ID";
pub const ENV_STREAM_ENDPOINT: &str = "PDFSTREAM_STREAM_ENDPOINT";
pub const ENV_STREAM_VERIFY: &str = "PDFSTREAM_STREAM_VERIFY";
pub const ENV_STREAM_TOKEN: &str = "PDFSTREAM_STREAM_TOKEN";
pub const ENV_CHECKPOINT_VOLUME: &str = "PDFSTREAM_CHECKPOINT_VOLUME";
pub const ENV_ARTIFACT_DIR: &str = "PDFSTREAM_ARTIFACT_DIR";
pub const ENV_INITIAL_POSITION: &str = "PDFSTREAM_INITIAL_POSITION";
pub const ENV_CONCURRENCY: &str = "PDFSTREAM_CONCURRENCY";
pub const ENV_QUEUE_DEPTH: &str = "PDFSTREAM_QUEUE_DEPTH";
pub const ENV_MAX_ATTEMPTS: &str = "PDFSTREAM_MAX_ATTEMPTS";
pub const ENV_EXTRACTION_TIMEOUT_SECS: &str = "PDFSTREAM_EXTRACTION_TIMEOUT_SECS";
pub const ENV_RETRY_INITIAL_BACKOFF_MS: &str = "PDFSTREAM_RETRY_INITIAL_BACKOFF_MS";
pub const ENV_RETRY_MAX_BACKOFF_MS: &str = "PDFSTREAM_RETRY_MAX_BACKOFF_MS";
pub const ENV_READ_BATCH_SIZE: &str = "PDFSTREAM_READ_BATCH_SIZE";
pub const ENV_POLL_INTERVAL_MS: &str = "PDFSTREAM_POLL_INTERVAL_MS";
pub const ENV_STREAM_TIMEOUT_SECS: &str = "PDFSTREAM_STREAM_TIMEOUT_SECS";
pub const ENV_READ_INITIAL_BACKOFF_MS: &str = "PDFSTREAM_READ_INITIAL_BACKOFF_MS";
pub const ENV_READ_MAX_BACKOFF_MS: &str = "PDFSTREAM_READ_MAX_BACKOFF_MS";
pub const ENV_CHECKPOINT_INTERVAL_MS: &str = "PDFSTREAM_CHECKPOINT_INTERVAL_MS";
pub const ENV_CHECKPOINT_MAX_ATTEMPTS: &str = "PDFSTREAM_CHECKPOINT_MAX_ATTEMPTS";
pub const ENV_METRICS_INTERVAL_SECS: &str = "PDFSTREAM_METRICS_INTERVAL_SECS";
pub const ENV_DOCUMENT_BASE_URL: &str = "PDFSTREAM_DOCUMENT_BASE_URL";

/// Runtime configuration for one shard's extraction agent.
///
/// All instances must be constructed via [`AgentConfig::builder`], [`AgentConfig::new`] or
/// [`AgentConfig::from_env`] so invariants are validated before any component observes the
/// values. The configuration is read once at startup and never reloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    stream_name: String,
    shard_id: String,
    stream_endpoint: String,
    stream_verify: bool,
    stream_token: Option<String>,
    checkpoint_volume: PathBuf,
    artifact_dir: PathBuf,
    initial_position: InitialPosition,
    concurrency: usize,
    queue_depth: usize,
    max_attempts: usize,
    extraction_timeout: Duration,
    retry_initial_backoff: Duration,
    retry_max_backoff: Duration,
    read_batch_size: usize,
    poll_interval: Duration,
    stream_timeout: Duration,
    read_initial_backoff: Duration,
    read_max_backoff: Duration,
    checkpoint_interval: Duration,
    checkpoint_max_attempts: usize,
    metrics_interval: Duration,
    document_base_url: Option<String>,
}

pub struct AgentConfigParams {
    pub stream_name: String,
    pub shard_id: String,
    pub stream_endpoint: String,
    pub stream_verify: bool,
    pub stream_token: Option<String>,
    pub checkpoint_volume: PathBuf,
    pub artifact_dir: PathBuf,
    pub initial_position: InitialPosition,
    pub concurrency: usize,
    pub queue_depth: usize,
    pub max_attempts: usize,
    pub extraction_timeout: Duration,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub read_batch_size: usize,
    pub poll_interval: Duration,
    pub stream_timeout: Duration,
    pub read_initial_backoff: Duration,
    pub read_max_backoff: Duration,
    pub checkpoint_interval: Duration,
    pub checkpoint_max_attempts: usize,
    pub metrics_interval: Duration,
    pub document_base_url: Option<String>,
}

impl AgentConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`AgentConfig::builder`] when most values use defaults.
    pub fn new(params: AgentConfigParams) -> Result<Self> {
        let AgentConfigParams {
            stream_name,
            shard_id,
            stream_endpoint,
            stream_verify,
            stream_token,
            checkpoint_volume,
            artifact_dir,
            initial_position,
            concurrency,
            queue_depth,
            max_attempts,
            extraction_timeout,
            retry_initial_backoff,
            retry_max_backoff,
            read_batch_size,
            poll_interval,
            stream_timeout,
            read_initial_backoff,
            read_max_backoff,
            checkpoint_interval,
            checkpoint_max_attempts,
            metrics_interval,
            document_base_url,
        } = params;

        let config = Self {
            stream_name: trimmed_string(stream_name),
            shard_id: trimmed_string(shard_id),
            stream_endpoint: trimmed_string(stream_endpoint),
            stream_verify,
            stream_token: stream_token.map(trimmed_string).filter(|t| !t.is_empty()),
            checkpoint_volume,
            artifact_dir,
            initial_position,
            concurrency,
            queue_depth,
            max_attempts,
            extraction_timeout,
            retry_initial_backoff,
            retry_max_backoff,
            read_batch_size,
            poll_interval,
            stream_timeout,
            read_initial_backoff,
            read_max_backoff,
            checkpoint_interval,
            checkpoint_max_attempts,
            metrics_interval,
            document_base_url: document_base_url
                .map(|url| trimmed_string(url).trim_end_matches('/').to_owned())
                .filter(|url| !url.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from `PDFSTREAM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup, using the same variable
    /// names as [`AgentConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder()
            .stream_name(
                env_value(&lookup, ENV_STREAM_NAME).unwrap_or_else(|| DEFAULT_STREAM_NAME.into()),
            )
            .shard_id(env_value(&lookup, ENV_SHARD_ID).context("PDFSTREAM_SHARD_ID is required")?)
            .stream_endpoint(
                env_value(&lookup, ENV_STREAM_ENDPOINT)
                    .context("PDFSTREAM_STREAM_ENDPOINT is required")?,
            )
            .checkpoint_volume(
                env_value(&lookup, ENV_CHECKPOINT_VOLUME)
                    .context("PDFSTREAM_CHECKPOINT_VOLUME is required")?,
            )
            .artifact_dir(
                env_value(&lookup, ENV_ARTIFACT_DIR).context("PDFSTREAM_ARTIFACT_DIR is required")?,
            );

        if let Some(verify) = env_bool(&lookup, ENV_STREAM_VERIFY)? {
            builder = builder.stream_verify(verify);
        }
        if let Some(token) = env_value(&lookup, ENV_STREAM_TOKEN) {
            builder = builder.stream_token(token);
        }
        if let Some(position) = env_parse::<InitialPosition, _>(&lookup, ENV_INITIAL_POSITION)? {
            builder = builder.initial_position(position);
        }
        if let Some(concurrency) = env_parse(&lookup, ENV_CONCURRENCY)? {
            builder = builder.concurrency(concurrency);
        }
        if let Some(depth) = env_parse(&lookup, ENV_QUEUE_DEPTH)? {
            builder = builder.queue_depth(depth);
        }
        if let Some(attempts) = env_parse(&lookup, ENV_MAX_ATTEMPTS)? {
            builder = builder.max_attempts(attempts);
        }
        if let Some(secs) = env_parse(&lookup, ENV_EXTRACTION_TIMEOUT_SECS)? {
            builder = builder.extraction_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = env_parse(&lookup, ENV_RETRY_INITIAL_BACKOFF_MS)? {
            builder = builder.retry_initial_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = env_parse(&lookup, ENV_RETRY_MAX_BACKOFF_MS)? {
            builder = builder.retry_max_backoff(Duration::from_millis(ms));
        }
        if let Some(size) = env_parse(&lookup, ENV_READ_BATCH_SIZE)? {
            builder = builder.read_batch_size(size);
        }
        if let Some(ms) = env_parse(&lookup, ENV_POLL_INTERVAL_MS)? {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = env_parse(&lookup, ENV_STREAM_TIMEOUT_SECS)? {
            builder = builder.stream_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = env_parse(&lookup, ENV_READ_INITIAL_BACKOFF_MS)? {
            builder = builder.read_initial_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = env_parse(&lookup, ENV_READ_MAX_BACKOFF_MS)? {
            builder = builder.read_max_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = env_parse(&lookup, ENV_CHECKPOINT_INTERVAL_MS)? {
            builder = builder.checkpoint_interval(Duration::from_millis(ms));
        }
        if let Some(attempts) = env_parse(&lookup, ENV_CHECKPOINT_MAX_ATTEMPTS)? {
            builder = builder.checkpoint_max_attempts(attempts);
        }
        if let Some(secs) = env_parse(&lookup, ENV_METRICS_INTERVAL_SECS)? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }
        if let Some(url) = env_value(&lookup, ENV_DOCUMENT_BASE_URL) {
            builder = builder.document_base_url(url);
        }

        builder.build()
    }

    /// Logical stream name.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Shard consumed by this agent.
    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Base URL of the stream gateway (including scheme).
    pub fn stream_endpoint(&self) -> &str {
        &self.stream_endpoint
    }

    /// Whether the stream transport must be trusted (https only).
    pub fn stream_verify(&self) -> bool {
        self.stream_verify
    }

    /// Optional bearer token sent to the stream gateway.
    pub fn stream_token(&self) -> Option<&str> {
        self.stream_token.as_deref()
    }

    /// Directory holding per-shard checkpoint files.
    pub fn checkpoint_volume(&self) -> &Path {
        &self.checkpoint_volume
    }

    /// Directory receiving extraction artifacts.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Origin used when the shard has no checkpoint yet.
    pub fn initial_position(&self) -> InitialPosition {
        self.initial_position
    }

    /// Number of concurrently executing workers.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Depth of the worker admission queue.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Maximum extraction attempts per work item.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Bound applied to every extraction call.
    pub fn extraction_timeout(&self) -> Duration {
        self.extraction_timeout
    }

    pub fn retry_initial_backoff(&self) -> Duration {
        self.retry_initial_backoff
    }

    pub fn retry_max_backoff(&self) -> Duration {
        self.retry_max_backoff
    }

    /// Maximum records requested per stream read.
    pub fn read_batch_size(&self) -> usize {
        self.read_batch_size
    }

    /// Idle delay between reads once the reader has caught up with the shard.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-request timeout for the stream gateway.
    pub fn stream_timeout(&self) -> Duration {
        self.stream_timeout
    }

    pub fn read_initial_backoff(&self) -> Duration {
        self.read_initial_backoff
    }

    pub fn read_max_backoff(&self) -> Duration {
        self.read_max_backoff
    }

    /// Minimum spacing between checkpoint writes.
    pub fn checkpoint_interval(&self) -> Duration {
        self.checkpoint_interval
    }

    pub fn checkpoint_max_attempts(&self) -> usize {
        self.checkpoint_max_attempts
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Base URL used to derive document locators (`{base}/pdf/{id}`).
    pub fn document_base_url(&self) -> Option<&str> {
        self.document_base_url.as_deref()
    }

    /// Upper bound of registered, non-terminal items (`concurrency + queue_depth`).
    pub fn admission_capacity(&self) -> usize {
        self.concurrency.saturating_add(self.queue_depth)
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.stream_name, "stream_name")?;
        ensure_not_empty(&self.shard_id, "shard_id")?;
        validate_path_segment(&self.stream_name, "stream_name")?;
        validate_path_segment(&self.shard_id, "shard_id")?;
        validate_url(&self.stream_endpoint, "stream_endpoint")?;

        if self.stream_verify && !self.stream_endpoint.starts_with("https://") {
            bail!("stream_endpoint must use https:// when stream_verify is enabled");
        }

        if self.checkpoint_volume.as_os_str().is_empty() {
            bail!("checkpoint_volume cannot be empty");
        }

        if self.artifact_dir.as_os_str().is_empty() {
            bail!("artifact_dir cannot be empty");
        }

        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }

        if self.queue_depth == 0 {
            bail!("queue_depth must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if self.extraction_timeout.is_zero() {
            bail!("extraction_timeout must be greater than 0");
        }

        if self.retry_initial_backoff.is_zero() {
            bail!("retry_initial_backoff must be greater than 0");
        }

        if self.retry_max_backoff < self.retry_initial_backoff {
            bail!("retry_max_backoff must be at least retry_initial_backoff");
        }

        if self.read_batch_size == 0 || self.read_batch_size > MAX_READ_BATCH_SIZE {
            bail!("read_batch_size must be between 1 and {MAX_READ_BATCH_SIZE}");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.stream_timeout.is_zero() {
            bail!("stream_timeout must be greater than 0");
        }

        if self.read_initial_backoff.is_zero() {
            bail!("read_initial_backoff must be greater than 0");
        }

        if self.read_max_backoff < self.read_initial_backoff {
            bail!("read_max_backoff must be at least read_initial_backoff");
        }

        if self.checkpoint_interval.is_zero() {
            bail!("checkpoint_interval must be greater than 0");
        }

        if self.checkpoint_max_attempts == 0 {
            bail!("checkpoint_max_attempts must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if let Some(url) = &self.document_base_url {
            validate_url(url, "document_base_url")?;
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct AgentConfigBuilder {
    stream_name: Option<String>,
    shard_id: Option<String>,
    stream_endpoint: Option<String>,
    stream_verify: Option<bool>,
    stream_token: Option<String>,
    checkpoint_volume: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    initial_position: Option<InitialPosition>,
    concurrency: Option<usize>,
    queue_depth: Option<usize>,
    max_attempts: Option<usize>,
    extraction_timeout: Option<Duration>,
    retry_initial_backoff: Option<Duration>,
    retry_max_backoff: Option<Duration>,
    read_batch_size: Option<usize>,
    poll_interval: Option<Duration>,
    stream_timeout: Option<Duration>,
    read_initial_backoff: Option<Duration>,
    read_max_backoff: Option<Duration>,
    checkpoint_interval: Option<Duration>,
    checkpoint_max_attempts: Option<usize>,
    metrics_interval: Option<Duration>,
    document_base_url: Option<String>,
}

impl AgentConfigBuilder {
    pub fn stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = Some(name.into());
        self
    }

    pub fn shard_id(mut self, shard: impl Into<String>) -> Self {
        self.shard_id = Some(shard.into());
        self
    }

    pub fn stream_endpoint(mut self, url: impl Into<String>) -> Self {
        self.stream_endpoint = Some(url.into());
        self
    }

    pub fn stream_verify(mut self, verify: bool) -> Self {
        self.stream_verify = Some(verify);
        self
    }

    pub fn stream_token(mut self, token: impl Into<String>) -> Self {
        self.stream_token = Some(token.into());
        self
    }

    pub fn checkpoint_volume(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_volume = Some(path.into());
        self
    }

    pub fn artifact_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(path.into());
        self
    }

    pub fn initial_position(mut self, position: InitialPosition) -> Self {
        self.initial_position = Some(position);
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = Some(timeout);
        self
    }

    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = Some(backoff);
        self
    }

    pub fn retry_max_backoff(mut self, backoff: Duration) -> Self {
        self.retry_max_backoff = Some(backoff);
        self
    }

    pub fn read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = Some(size);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    pub fn read_initial_backoff(mut self, backoff: Duration) -> Self {
        self.read_initial_backoff = Some(backoff);
        self
    }

    pub fn read_max_backoff(mut self, backoff: Duration) -> Self {
        self.read_max_backoff = Some(backoff);
        self
    }

    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    pub fn checkpoint_max_attempts(mut self, attempts: usize) -> Self {
        self.checkpoint_max_attempts = Some(attempts);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn document_base_url(mut self, url: impl Into<String>) -> Self {
        self.document_base_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        let params = AgentConfigParams {
            stream_name: self.stream_name.context("stream_name is required")?,
            shard_id: self.shard_id.context("shard_id is required")?,
            stream_endpoint: self.stream_endpoint.context("stream_endpoint is required")?,
            stream_verify: self.stream_verify.unwrap_or(true),
            stream_token: self.stream_token,
            checkpoint_volume: self
                .checkpoint_volume
                .context("checkpoint_volume is required")?,
            artifact_dir: self.artifact_dir.context("artifact_dir is required")?,
            initial_position: self.initial_position.unwrap_or_default(),
            concurrency,
            queue_depth: self.queue_depth.unwrap_or(concurrency),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            extraction_timeout: self
                .extraction_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS)),
            retry_initial_backoff: self
                .retry_initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RETRY_INITIAL_BACKOFF_MS)),
            retry_max_backoff: self
                .retry_max_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RETRY_MAX_BACKOFF_MS)),
            read_batch_size: self.read_batch_size.unwrap_or(DEFAULT_READ_BATCH_SIZE),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            stream_timeout: self
                .stream_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS)),
            read_initial_backoff: self
                .read_initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_READ_INITIAL_BACKOFF_MS)),
            read_max_backoff: self
                .read_max_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_READ_MAX_BACKOFF_MS)),
            checkpoint_interval: self
                .checkpoint_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_CHECKPOINT_INTERVAL_MS)),
            checkpoint_max_attempts: self
                .checkpoint_max_attempts
                .unwrap_or(DEFAULT_CHECKPOINT_MAX_ATTEMPTS),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            document_base_url: self.document_base_url,
        };

        AgentConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}

// Stream and shard names become checkpoint file path components.
fn validate_path_segment(value: &str, field: &str) -> Result<()> {
    if value.starts_with('.') {
        bail!("{field} cannot start with '.'");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        bail!("{field} may only contain ASCII letters, digits, '-', '_' and '.'");
    }
    Ok(())
}

pub(crate) fn env_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match env_value(lookup, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("{key} has invalid value {raw:?}: {err}")),
    }
}

fn env_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match env_value(lookup, key) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => bail!("{key} must be a boolean, got {raw:?}"),
        },
    }
}
