use crate::config::SearchConfig;
use crate::ocr::{OcrBlock, OcrOutcome};
use quire_doc_model::PageUid;
use quire_pdf_engine::{PageText, TextLine};
use std::collections::HashMap;
use tracing::debug;

/// Where a page's indexed text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    Native,
    Ocr,
}

/// A searchable run of text with its box on the unrotated page, top-left
/// origin. Rotation is a display concern and never touches these.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl From<&TextLine> for TextSpan {
    fn from(line: &TextLine) -> Self {
        Self {
            text: line.text.clone(),
            x: line.x,
            y: line.y,
            width: line.width,
            height: line.height,
        }
    }
}

impl From<&OcrBlock> for TextSpan {
    fn from(block: &OcrBlock) -> Self {
        let (x, y, width, height) = block.bbox;
        Self { text: block.text.clone(), x, y, width, height }
    }
}

/// Indexed text of one page. Spans are kept sorted in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageEntry {
    pub text: String,
    pub spans: Vec<TextSpan>,
    pub source: TextSource,
}

/// One search match: which page (by uid and current position) and which
/// span on it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub uid: PageUid,
    pub page_position: usize,
    pub span: TextSpan,
}

/// Per-uid text index over the pages of a document.
///
/// Entries are written by whoever drives extraction; the index itself never
/// talks to a PDF backend. Removed pages must be evicted explicitly, and
/// duplicated pages can copy the original's entry since they share content.
#[derive(Debug, Default)]
pub struct SearchIndex {
    config: SearchConfig,
    entries: HashMap<PageUid, PageEntry>,
}

fn sorted_spans(mut spans: Vec<TextSpan>) -> Vec<TextSpan> {
    spans.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
    spans
}

impl SearchIndex {
    pub fn new(config: SearchConfig) -> Self {
        Self { config, entries: HashMap::new() }
    }

    pub fn config(&self) -> SearchConfig {
        self.config
    }

    /// Stores the natively extracted text for a page.
    pub fn set_native_text(&mut self, uid: PageUid, page: &PageText) {
        let spans = sorted_spans(page.lines.iter().map(TextSpan::from).collect());
        self.entries
            .insert(uid, PageEntry { text: page.text.clone(), spans, source: TextSource::Native });
    }

    /// Replaces a page's entry with recognized text. OCR is only ever run on
    /// explicit request, so the result wins over whatever was there before.
    pub fn apply_ocr(&mut self, uid: PageUid, outcome: &OcrOutcome) {
        let spans = sorted_spans(outcome.blocks.iter().map(TextSpan::from).collect());
        debug!(%uid, blocks = spans.len(), confidence = outcome.confidence, "applied ocr text");
        self.entries
            .insert(uid, PageEntry { text: outcome.text.clone(), spans, source: TextSource::Ocr });
    }

    /// Whether the page's native text layer was too thin to search.
    /// `None` means the page has not been extracted yet.
    pub fn needs_ocr(&self, uid: PageUid) -> Option<bool> {
        self.entries
            .get(&uid)
            .map(|entry| entry.source == TextSource::Native && self.config.needs_ocr(&entry.text))
    }

    /// Copies the original's entry onto a duplicated page. Returns false
    /// when the original was never indexed.
    pub fn copy_entry(&mut self, original: PageUid, duplicate: PageUid) -> bool {
        match self.entries.get(&original).cloned() {
            Some(entry) => {
                self.entries.insert(duplicate, entry);
                true
            }
            None => false,
        }
    }

    /// Adopts an entry that was built elsewhere, typically when pages move
    /// between documents and their indexed text should travel along.
    pub fn import_entry(&mut self, uid: PageUid, entry: PageEntry) {
        self.entries.insert(uid, entry);
    }

    pub fn remove(&mut self, uid: PageUid) -> bool {
        self.entries.remove(&uid).is_some()
    }

    pub fn contains(&self, uid: PageUid) -> bool {
        self.entries.contains_key(&uid)
    }

    pub fn text(&self, uid: PageUid) -> Option<&str> {
        self.entries.get(&uid).map(|entry| entry.text.as_str())
    }

    pub fn entry(&self, uid: PageUid) -> Option<&PageEntry> {
        self.entries.get(&uid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Case-insensitive substring search, evaluated lazily.
    ///
    /// Hits come back in `page_order`, and within a page in reading order
    /// (top to bottom, then left to right). Pages missing from the index are
    /// skipped, so callers can search before extraction has finished.
    pub fn search<'a>(&'a self, query: &str, page_order: &'a [PageUid]) -> SearchHits<'a> {
        let needle = query.trim().to_lowercase();
        let page_cursor = if needle.is_empty() { page_order.len() } else { 0 };

        SearchHits { index: self, page_order, needle, page_cursor, span_cursor: 0 }
    }
}

/// Iterator over search matches. Pages are only inspected as the iterator
/// advances past them.
pub struct SearchHits<'a> {
    index: &'a SearchIndex,
    page_order: &'a [PageUid],
    needle: String,
    page_cursor: usize,
    span_cursor: usize,
}

impl Iterator for SearchHits<'_> {
    type Item = SearchHit;

    fn next(&mut self) -> Option<SearchHit> {
        while self.page_cursor < self.page_order.len() {
            let uid = self.page_order[self.page_cursor];

            if let Some(entry) = self.index.entries.get(&uid) {
                while self.span_cursor < entry.spans.len() {
                    let span = &entry.spans[self.span_cursor];
                    self.span_cursor += 1;

                    if span.text.to_lowercase().contains(&self.needle) {
                        return Some(SearchHit {
                            uid,
                            page_position: self.page_cursor,
                            span: span.clone(),
                        });
                    }
                }
            }

            self.page_cursor += 1;
            self.span_cursor = 0;
        }

        None
    }
}
