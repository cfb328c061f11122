//! Stream gateway plumbing: record model, client trait and JSON-RPC client,
//! authentication, circuit breaker, metrics, retry logging, and desync detection.

pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod desync;
pub mod metrics;
pub mod options;
pub mod record;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, StreamCircuitBreaker,
};
pub use client::{RpcStreamClient, StreamClient, StreamError};
pub use desync::StreamDesyncError;
pub use metrics::StreamMetricsSnapshot;
pub use options::StreamClientOptions;
pub use record::{InitialPosition, ReadPosition, RecordBatch, StreamRecord};
