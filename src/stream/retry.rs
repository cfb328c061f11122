//! Retry context and canned log messages used by the gateway client so every
//! attempt reports shard, cursor, and breaker state the same way.

use crate::stream::circuit_breaker::CircuitState;
use crate::stream::client::StreamError;
use crate::stream::record::ReadPosition;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        tracing::$level!(
            shard = $ctx.shard,
            position = %$ctx.position,
            $($rest)*
        );
    }};
}

/// Log labels describing how one gateway operation reports its retries.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) permit: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) timeout: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) desync: &'static str,
}

#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    shard: &'a str,
    position: ReadPosition,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages, shard: &'a str, position: ReadPosition) -> Self {
        Self {
            shard,
            position,
            messages,
        }
    }

    pub(crate) fn log_permit(&self, state: CircuitState) {
        log_with_retry_ctx!(trace, self, breaker_state = ?state, "{}", self.messages.permit);
    }

    pub(crate) fn log_circuit_open(&self) {
        log_with_retry_ctx!(warn, self, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_timeout(&self, attempt: usize, backoff: Duration) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            "{}",
            self.messages.timeout
        );
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &StreamError) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &StreamError) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_desync(&self, attempt: usize, err: &StreamError) {
        log_with_retry_ctx!(warn, self, attempt, error = %err, "{}", self.messages.desync);
    }
}

pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const GET_RECORDS_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for getrecords",
    circuit_open: "stream circuit breaker open; rejecting getrecords",
    timeout: "getrecords timed out; will retry",
    retry: "getrecords failed; retrying",
    exhausted: "getrecords exhausted retries",
    desync: "getrecords rejected the read position",
};
