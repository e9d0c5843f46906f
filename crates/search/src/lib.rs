//! Text indexing and search across the arranged pages of a document.
//!
//! Pages are indexed per uid from native extraction or OCR; queries walk
//! pages in display order and spans in reading order, lazily.

mod config;
mod index;
mod ocr;

pub use config::SearchConfig;
pub use index::{PageEntry, SearchHit, SearchIndex, TextSource, TextSpan};
pub use ocr::{DisabledOcr, OcrBlock, OcrError, OcrOutcome, OcrProvider};
