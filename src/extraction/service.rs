use super::document::DocumentId;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::time::Duration;

/// Failure classes reported by an extractor. Timeouts are classified by the worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("transient extraction failure: {0}")]
    Transient(String),
    #[error("document cannot be processed: {0}")]
    Permanent(String),
}

pub type ExtractionFuture<'a> = BoxFuture<'a, Result<Bytes, ExtractionError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub document_id: DocumentId,
    pub locator: String,
    /// 1-based attempt number.
    pub attempt: usize,
}

/// The external Extraction Service. Returns the artifact bytes for one document.
pub trait Extractor: Send + Sync + 'static {
    fn extract<'a>(&'a self, request: &'a ExtractionRequest) -> ExtractionFuture<'a>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success { artifact: PathBuf },
    TransientFailure { error: String },
    PermanentFailure { error: String },
}

impl ExtractionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExtractionOutcome::TransientFailure { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExtractionOutcome::Success { .. } => "success",
            ExtractionOutcome::TransientFailure { .. } => "transient_failure",
            ExtractionOutcome::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

/// Outcome of one attempt (transient) or of the whole item (terminal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub sequence: u64,
    /// Absent when the payload never yielded a valid id.
    pub document_id: Option<DocumentId>,
    pub attempts: usize,
    /// Time since the item was admitted; zero for payloads rejected before admission.
    pub elapsed: Duration,
    pub outcome: ExtractionOutcome,
}

impl ExtractionResult {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }
}
