//! PDF backend abstraction: opening sources, querying page geometry,
//! rasterizing pages, extracting text, and writing assembled documents.

use image::{ImageBuffer, Rgba};
use quire_doc_model::Rotation;
use std::path::{Path, PathBuf};

mod backend;

pub use backend::LopdfEngine;
#[cfg(feature = "pdfium")]
pub use backend::pdfium_backend;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Points per inch in PDF user space.
pub const POINTS_PER_INCH: f32 = 72.0;

/// Opaque handle to a document opened by an engine. Handles are only
/// meaningful to the engine that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Unrotated page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    /// Pixel dimensions when rendered at `dpi`, after applying the display
    /// rotation. Quarter turns swap width and height.
    pub fn pixel_dimensions(&self, dpi: u32, rotation: Rotation) -> (u32, u32) {
        let scale = dpi as f32 / POINTS_PER_INCH;
        let width = (self.width_pt * scale).round().max(1.0) as u32;
        let height = (self.height_pt * scale).round().max(1.0) as u32;

        if rotation.is_quarter_turn() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

/// One line of extracted text with its approximate box on the unrotated
/// page. Origin is the top-left corner, units are points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Text content of one page: the full string plus per-line boxes in
/// reading order (top to bottom, then left to right).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    pub text: String,
    pub lines: Vec<TextLine>,
}

impl PageText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One page of an assembled output document: which opened source it comes
/// from, which page of that source, and the rotation to bake into the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPage {
    pub handle: DocumentHandle,
    pub page_index: u32,
    pub rotation: Rotation,
}

impl OutputPage {
    pub fn new(handle: DocumentHandle, page_index: u32, rotation: Rotation) -> Self {
        Self { handle, page_index, rotation }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted documents are not supported")]
    Encrypted,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Backend contract for everything that touches actual PDF data.
///
/// Callers identify pages by `(handle, page_index)` against the source as it
/// was opened; arrangement state lives above this trait and is baked in only
/// through [`PdfEngine::write_document`].
pub trait PdfEngine {
    /// Opens a document and returns a handle for later calls. Encrypted
    /// documents are rejected with [`EngineError::Encrypted`].
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, EngineError>;

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError>;

    fn page_size(&self, handle: DocumentHandle, page_index: u32) -> Result<PageSize, EngineError>;

    /// Rasterizes one source page at the given resolution, applying the
    /// display rotation to the output image.
    fn render_page(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        rotation: Rotation,
        dpi: u32,
    ) -> Result<RgbaImage, EngineError>;

    /// Extracts the selectable text of one source page. Pages without a text
    /// layer yield an empty [`PageText`], not an error.
    fn extract_text(&self, handle: DocumentHandle, page_index: u32)
        -> Result<PageText, EngineError>;

    /// Assembles a new document from source pages, in the order given,
    /// baking each entry's rotation into the page's `/Rotate` value.
    fn write_document(&self, pages: &[OutputPage]) -> Result<Vec<u8>, EngineError>;

    fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError>;
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_dimensions_scale_with_dpi() {
        let letter = PageSize { width_pt: 612.0, height_pt: 792.0 };

        assert_eq!(letter.pixel_dimensions(72, Rotation::R0), (612, 792));
        assert_eq!(letter.pixel_dimensions(144, Rotation::R0), (1224, 1584));
    }

    #[test]
    fn quarter_turns_swap_pixel_dimensions() {
        let letter = PageSize { width_pt: 612.0, height_pt: 792.0 };

        assert_eq!(letter.pixel_dimensions(72, Rotation::R90), (792, 612));
        assert_eq!(letter.pixel_dimensions(72, Rotation::R180), (612, 792));
        assert_eq!(letter.pixel_dimensions(72, Rotation::R270), (792, 612));
    }

    #[test]
    fn page_text_empty_ignores_whitespace() {
        let text = PageText { text: "  \n\t ".to_owned(), lines: Vec::new() };
        assert!(text.is_empty());
    }
}
