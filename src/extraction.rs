//! Extraction Service seam: the `Extractor` trait and outcome classification, the
//! document model carried by stream payloads, the idempotent artifact store, and the
//! command-line extractor that runs the external tool once per item.

pub mod artifact;
pub mod command;
pub mod document;
pub mod service;

pub use artifact::ArtifactStore;
pub use command::{CommandExtractor, CommandExtractorConfig};
pub use document::{decode_document, Document, DocumentError, DocumentId, DocumentPayload};
pub use service::{
    ExtractionError, ExtractionFuture, ExtractionOutcome, ExtractionRequest, ExtractionResult,
    Extractor,
};
