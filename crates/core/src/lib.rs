//! Document Session Core
//!
//! Ties the arrangement model, render cache, search index, and job
//! scheduler together into per-document sessions and a multi-document
//! workspace.

pub mod error;
pub mod export;
pub mod session;
pub mod workspace;

mod jobs;
mod source;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::SessionError;
pub use export::{ExportFormat, DEFAULT_JPEG_QUALITY};
pub use session::{
    RenderRequest, Session, SessionConfig, SessionEvent, SharedEngine, TextRequest,
    DEFAULT_OCR_DPI, DEFAULT_PREVIEW_DPI,
};
pub use workspace::{DocumentId, Workspace, WorkspaceError};
