//! Per-shard pipeline: Stream Reader -> Dispatcher -> Worker Pool -> Progress Tracker,
//! orchestrated by [`ExtractionAgent`].

pub mod agent;
pub(crate) mod backoff;
pub mod dispatcher;
pub(crate) mod frontier;
pub(crate) mod lifecycle;
pub mod progress;
pub mod reader;
pub mod worker;
pub(crate) mod worker_pool;

pub use agent::ExtractionAgent;
pub use dispatcher::WorkItem;
pub use progress::{FailureRecord, ProgressSnapshot};
pub use reader::{StreamReader, StreamReaderParams};
pub use worker::WorkerActivityTracker;
