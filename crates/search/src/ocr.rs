use quire_pdf_engine::RgbaImage;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("no OCR engine is configured: {0}")]
    Unavailable(String),
    #[error("OCR failed: {0}")]
    Failed(String),
}

/// One recognized block of text with its box on the rendered page image,
/// in unrotated page coordinates with a top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrBlock {
    pub text: String,
    pub bbox: (f32, f32, f32, f32),
    pub confidence: f32,
}

/// Full result of recognizing one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutcome {
    pub text: String,
    pub blocks: Vec<OcrBlock>,
    /// Overall confidence, 0.0 to 1.0.
    pub confidence: f32,
}

impl OcrOutcome {
    /// Builds an outcome from recognized blocks, joining their text and
    /// averaging their confidence.
    pub fn from_blocks(blocks: Vec<OcrBlock>) -> Self {
        let text = blocks.iter().map(|block| block.text.as_str()).collect::<Vec<_>>().join("\n");
        let confidence = if blocks.is_empty() {
            0.0
        } else {
            blocks.iter().map(|block| block.confidence).sum::<f32>() / blocks.len() as f32
        };

        Self { text, blocks, confidence }
    }
}

/// Recognition backend. Implementations receive the page already rendered
/// at the resolution the caller chose, and never touch document state.
pub trait OcrProvider: Send + Sync {
    fn recognize(&self, page: &RgbaImage) -> Result<OcrOutcome, OcrError>;
}

/// Placeholder provider used when no OCR engine has been wired up.
/// Every request fails with [`OcrError::Unavailable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledOcr;

impl OcrProvider for DisabledOcr {
    fn recognize(&self, _page: &RgbaImage) -> Result<OcrOutcome, OcrError> {
        Err(OcrError::Unavailable("install an OCR backend to recognize scanned pages".to_owned()))
    }
}
