pub mod checkpoint;
pub mod extraction;
pub mod pipeline;
pub mod runtime;
pub mod stream;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use extraction::{
    ArtifactStore, CommandExtractor, CommandExtractorConfig, DocumentId, ExtractionError,
    ExtractionFuture, ExtractionOutcome, ExtractionRequest, ExtractionResult, Extractor,
};
pub use pipeline::{ExtractionAgent, FailureRecord, ProgressSnapshot};
pub use runtime::config::{AgentConfig, AgentConfigBuilder, AgentConfigParams};
pub use runtime::runner::Runner;
pub use runtime::state::ShardState;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use stream::{
    InitialPosition, ReadPosition, RecordBatch, RpcStreamClient, StreamClient, StreamDesyncError,
    StreamError, StreamRecord,
};
