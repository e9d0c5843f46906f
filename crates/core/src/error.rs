use quire_doc_model::{ModelError, SourceId};
use quire_pdf_engine::EngineError;

/// Errors surfaced by session operations.
///
/// Selection problems are rejected before any state changes, so a failed
/// call leaves the document exactly as it was. Render and text extraction
/// failures of background jobs are not here: those arrive as
/// [`SessionEvent`](crate::SessionEvent)s and never abort anything.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to load document: {0}")]
    Load(String),
    #[error("document is encrypted and cannot be opened")]
    Encrypted,
    #[error(transparent)]
    InvalidSelection(#[from] ModelError),
    #[error("PDF backend error: {0}")]
    Pdf(#[from] EngineError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("page references source {0:?} which is not open in this session")]
    UnknownSource(SourceId),
}
