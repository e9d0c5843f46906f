use crate::{
    DocumentHandle, EngineError, OpenSource, OutputPage, PageSize, PageText, PdfEngine, RgbaImage,
    TextLine,
};
use image::Rgba;
use lopdf::{Dictionary, Document, Object, ObjectId};
use quire_doc_model::Rotation;
use std::collections::HashMap;
use std::fs;
use tracing::debug;

const US_LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

/// Page attributes that may live on an ancestor `Pages` node. They are
/// copied down onto each page before it is re-parented into a new document.
const INHERITED_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const SYNTH_MARGIN_PT: f32 = 72.0;
const SYNTH_LINE_HEIGHT_PT: f32 = 14.0;
const SYNTH_GLYPH_WIDTH_PT: f32 = 7.2;

struct DocumentRecord {
    bytes: Vec<u8>,
    document: Document,
    sizes: Vec<PageSize>,
}

impl DocumentRecord {
    fn page_size(&self, page_index: u32) -> Result<PageSize, EngineError> {
        self.sizes.get(page_index as usize).copied().ok_or(EngineError::PageOutOfRange {
            page: page_index,
            page_count: self.sizes.len() as u32,
        })
    }
}

/// Pure-Rust backend built on the lopdf object layer.
///
/// Geometry and text come straight from parsed page dictionaries; rendering
/// produces blank page placeholders at the correct pixel dimensions, since
/// lopdf has no rasterizer. The optional `pdfium` feature swaps in a real
/// rasterizer without changing any call sites.
#[derive(Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, EngineError> {
        self.docs.get(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }
}

fn looks_encrypted(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt")
}

/// Walks the `/Parent` chain looking for an attribute the page may inherit
/// from an ancestor node.
fn inherited_page_attribute<'a>(
    document: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>, EngineError> {
    let mut current = page_id;
    loop {
        let dict = document.get_dictionary(current)?;
        if let Ok(value) = dict.get(key) {
            return Ok(Some(value));
        }

        match dict.get(b"Parent") {
            Ok(parent) => current = parent.as_reference()?,
            Err(_) => return Ok(None),
        }
    }
}

fn parse_media_box(array: &[Object]) -> Option<PageSize> {
    if array.len() != 4 {
        return None;
    }

    let x0 = array[0].as_float().ok()?;
    let y0 = array[1].as_float().ok()?;
    let x1 = array[2].as_float().ok()?;
    let y1 = array[3].as_float().ok()?;

    Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
}

fn page_sizes(document: &Document) -> Result<Vec<PageSize>, EngineError> {
    let pages = document.get_pages();
    let mut sizes = Vec::with_capacity(pages.len());

    for (_, page_id) in pages {
        let size = inherited_page_attribute(document, page_id, b"MediaBox")?
            .and_then(|object| object.as_array().ok())
            .and_then(|array| parse_media_box(array));

        sizes.push(size.unwrap_or(US_LETTER));
    }

    Ok(sizes)
}

/// Standalone copy of a page dictionary: inherited attributes are written
/// directly onto the page so it stays valid under a new parent.
fn materialize_page_dict(
    document: &Document,
    page_id: ObjectId,
) -> Result<Dictionary, EngineError> {
    let mut dict = document.get_dictionary(page_id)?.clone();

    for key in INHERITED_PAGE_KEYS {
        if dict.has(key) {
            continue;
        }
        if let Some(value) = inherited_page_attribute(document, page_id, key)? {
            let value = value.clone();
            dict.set(key, value);
        }
    }

    dict.remove(b"Parent");
    Ok(dict)
}

/// Line boxes for extracted text. The object layer reports text in reading
/// order but not glyph geometry, so each line gets a nominal body-text box
/// stacked top to bottom. Positions are approximate; ordering is exact.
fn synthesize_lines(text: &str, size: PageSize) -> Vec<TextLine> {
    let usable_width = (size.width_pt - 2.0 * SYNTH_MARGIN_PT).max(SYNTH_GLYPH_WIDTH_PT);

    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| TextLine {
            text: line.to_owned(),
            x: SYNTH_MARGIN_PT,
            y: SYNTH_MARGIN_PT + index as f32 * SYNTH_LINE_HEIGHT_PT,
            width: (line.chars().count() as f32 * SYNTH_GLYPH_WIDTH_PT).min(usable_width),
            height: SYNTH_LINE_HEIGHT_PT - 2.0,
        })
        .collect()
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, EngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let document = match Document::load_mem(&bytes) {
            Ok(document) => document,
            Err(_) if looks_encrypted(&bytes) => return Err(EngineError::Encrypted),
            Err(err) => return Err(err.into()),
        };

        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(EngineError::Encrypted);
        }

        let sizes = page_sizes(&document)?;
        if sizes.is_empty() {
            return Err(EngineError::Backend("document has no pages".to_owned()));
        }

        self.next_handle += 1;
        let handle = DocumentHandle::from_raw(self.next_handle);
        debug!(handle = handle.raw(), pages = sizes.len(), "opened document");
        self.docs.insert(handle, DocumentRecord { bytes, document, sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError> {
        Ok(self.record(handle)?.sizes.len() as u32)
    }

    fn page_size(&self, handle: DocumentHandle, page_index: u32) -> Result<PageSize, EngineError> {
        self.record(handle)?.page_size(page_index)
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        rotation: Rotation,
        dpi: u32,
    ) -> Result<RgbaImage, EngineError> {
        let size = self.record(handle)?.page_size(page_index)?;
        let dpi = if dpi == 0 { 72 } else { dpi };
        let (width, height) = size.pixel_dimensions(dpi, rotation);

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        let border = Rgba([216, 216, 216, 255]);
        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, border);
                image.put_pixel(x, height - 1, border);
            }
            for y in 0..height {
                image.put_pixel(0, y, border);
                image.put_pixel(width - 1, y, border);
            }
        }

        Ok(image)
    }

    fn extract_text(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageText, EngineError> {
        let record = self.record(handle)?;
        let size = record.page_size(page_index)?;

        // lopdf page numbers are 1-based.
        let text = record.document.extract_text(&[page_index + 1])?;
        let lines = synthesize_lines(&text, size);

        Ok(PageText { text, lines })
    }

    fn write_document(&self, pages: &[OutputPage]) -> Result<Vec<u8>, EngineError> {
        if pages.is_empty() {
            return Err(EngineError::Backend("no pages to write".to_owned()));
        }

        // Validate the whole request before building anything.
        for page in pages {
            self.record(page.handle)?.page_size(page.page_index)?;
        }

        let mut output = Document::with_version("1.5");
        let mut max_id: u32 = 1;
        let mut source_pages: HashMap<u64, Vec<Dictionary>> = HashMap::new();

        // Lift each referenced source into the output graph exactly once,
        // renumbered into a disjoint id range. Page dictionaries are held
        // back so every output entry can get its own copy.
        for page in pages {
            let raw = page.handle.raw();
            if source_pages.contains_key(&raw) {
                continue;
            }

            let record = self.record(page.handle)?;
            let mut source = Document::load_mem(&record.bytes)?;
            source.renumber_objects_with(max_id);
            max_id = source.max_id + 1;

            let page_ids: Vec<ObjectId> = source.get_pages().values().copied().collect();
            let mut dicts = Vec::with_capacity(page_ids.len());
            for page_id in page_ids {
                dicts.push(materialize_page_dict(&source, page_id)?);
            }

            for (object_id, object) in source.objects {
                match object.type_name().unwrap_or("") {
                    "Catalog" | "Pages" | "Page" | "Outlines" | "Outline" => {}
                    _ => {
                        output.objects.insert(object_id, object);
                    }
                }
            }

            source_pages.insert(raw, dicts);
        }

        // Copied objects were inserted directly, so bring the id counter up
        // to date before allocating new objects.
        output.max_id = max_id.saturating_sub(1);
        let pages_id = output.new_object_id();

        let mut kids = Vec::with_capacity(pages.len());
        for page in pages {
            let dicts = &source_pages[&page.handle.raw()];
            let mut dict = dicts[page.page_index as usize].clone();

            let existing = dict.get(b"Rotate").and_then(|object| object.as_i64()).unwrap_or(0);
            let baked = (existing + i64::from(page.rotation.degrees())).rem_euclid(360);
            if baked == 0 {
                dict.remove(b"Rotate");
            } else {
                dict.set("Rotate", baked);
            }

            dict.set("Parent", pages_id);
            let page_id = output.add_object(dict);
            kids.push(Object::Reference(page_id));
        }

        let kid_count = kids.len() as i64;
        output.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(kids)),
                ("Count", Object::Integer(kid_count)),
            ])),
        );

        let catalog_id = output.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        output.trailer.set("Root", catalog_id);

        output.renumber_objects();
        output.compress();

        let mut bytes = Vec::new();
        output.save_to(&mut bytes)?;
        debug!(pages = pages.len(), bytes = bytes.len(), "assembled document");

        Ok(bytes)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError> {
        self.docs
            .remove(&handle)
            .map(|_| ())
            .ok_or(EngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// Engine variant that requires a pdfium system library at startup.
    ///
    /// Document assembly still goes through the lopdf object layer; the
    /// binding check exists so callers fail fast when the rasterizer they
    /// asked for is unavailable.
    pub struct PdfiumEngine {
        inner: LopdfEngine,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, EngineError> {
            let _ = Pdfium::bind_to_system_library().map_err(|err| {
                EngineError::Backend(format!("failed to bind pdfium system library: {err}"))
            })?;

            Ok(Self { inner: LopdfEngine::default() })
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, EngineError> {
            self.inner.open(source)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError> {
            self.inner.page_count(handle)
        }

        fn page_size(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageSize, EngineError> {
            self.inner.page_size(handle, page_index)
        }

        fn render_page(
            &self,
            handle: DocumentHandle,
            page_index: u32,
            rotation: Rotation,
            dpi: u32,
        ) -> Result<RgbaImage, EngineError> {
            self.inner.render_page(handle, page_index, rotation, dpi)
        }

        fn extract_text(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageText, EngineError> {
            self.inner.extract_text(handle, page_index)
        }

        fn write_document(&self, pages: &[OutputPage]) -> Result<Vec<u8>, EngineError> {
            self.inner.write_document(pages)
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError> {
            self.inner.close(handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream, StringFormat};

    /// Builds a document with one page per entry, each showing its text in
    /// 12pt Courier. Resources and MediaBox live on the page tree node so
    /// inheritance gets exercised.
    fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
        build_pdf(texts, None)
    }

    fn build_pdf(texts: &[&str], page_rotate: Option<i64>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(texts.len());
        for text in texts {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if let Some(rotate) = page_rotate {
                page.set("Rotate", rotate);
            }
            kids.push(doc.add_object(page).into());
        }

        let count = texts.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn encrypted_pdf() -> Vec<u8> {
        let mut doc = Document::load_mem(&pdf_with_pages(&["secret"])).unwrap();
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
            "O" => Object::String(vec![0; 32], StringFormat::Literal),
            "U" => Object::String(vec![0; 32], StringFormat::Literal),
            "P" => -44,
        });
        doc.trailer.set("Encrypt", encrypt_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn output_page_dicts(bytes: &[u8]) -> Vec<Dictionary> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| doc.get_dictionary(id).unwrap().clone())
            .collect()
    }

    #[test]
    fn opens_pdf_and_reads_page_count() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha", "bravo", "charlie"]).into()).unwrap();

        assert_eq!(engine.page_count(handle).unwrap(), 3);
    }

    #[test]
    fn rejects_encrypted_documents() {
        let mut engine = LopdfEngine::new();
        let err = engine.open(encrypted_pdf().into()).unwrap_err();

        assert!(matches!(err, EngineError::Encrypted));
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let engine = LopdfEngine::new();
        let err = engine.page_count(DocumentHandle::from_raw(999)).unwrap_err();

        assert!(matches!(err, EngineError::InvalidHandle(999)));
    }

    #[test]
    fn page_size_comes_from_inherited_media_box() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha"]).into()).unwrap();

        let size = engine.page_size(handle, 0).unwrap();
        assert_eq!(size, PageSize { width_pt: 612.0, height_pt: 792.0 });
    }

    #[test]
    fn out_of_range_page_is_rejected() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha", "bravo"]).into()).unwrap();

        let err = engine.page_size(handle, 9).unwrap_err();
        assert!(matches!(err, EngineError::PageOutOfRange { page: 9, page_count: 2 }));
    }

    #[test]
    fn render_matches_requested_dpi_and_rotation() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha"]).into()).unwrap();

        let upright = engine.render_page(handle, 0, Rotation::R0, 72).unwrap();
        assert_eq!((upright.width(), upright.height()), (612, 792));

        let turned = engine.render_page(handle, 0, Rotation::R90, 72).unwrap();
        assert_eq!((turned.width(), turned.height()), (792, 612));

        let doubled = engine.render_page(handle, 0, Rotation::R0, 144).unwrap();
        assert_eq!((doubled.width(), doubled.height()), (1224, 1584));
    }

    #[test]
    fn extract_text_reads_each_page() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha bravo", "charlie delta"]).into()).unwrap();

        let first = engine.extract_text(handle, 0).unwrap();
        assert!(first.text.contains("alpha bravo"));
        assert_eq!(first.lines.len(), 1);

        let second = engine.extract_text(handle, 1).unwrap();
        assert!(second.text.contains("charlie delta"));
    }

    #[test]
    fn synthesized_lines_stack_top_to_bottom() {
        let lines = synthesize_lines("first line\nsecond line\n\nthird", US_LETTER);

        assert_eq!(lines.len(), 3);
        assert!(lines[0].y < lines[1].y);
        assert!(lines[1].y < lines[2].y);
        assert!(lines.iter().all(|line| line.x == lines[0].x));
    }

    #[test]
    fn write_document_orders_pages_as_given() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha", "bravo", "charlie"]).into()).unwrap();

        let bytes = engine
            .write_document(&[
                OutputPage::new(handle, 2, Rotation::R0),
                OutputPage::new(handle, 0, Rotation::R90),
            ])
            .unwrap();

        let mut reopened = LopdfEngine::new();
        let out = reopened.open(bytes.clone().into()).unwrap();
        assert_eq!(reopened.page_count(out).unwrap(), 2);
        assert!(reopened.extract_text(out, 0).unwrap().text.contains("charlie"));
        assert!(reopened.extract_text(out, 1).unwrap().text.contains("alpha"));

        let dicts = output_page_dicts(&bytes);
        assert!(dicts[0].get(b"Rotate").is_err());
        assert_eq!(dicts[1].get(b"Rotate").unwrap().as_i64().unwrap(), 90);
    }

    #[test]
    fn write_document_bakes_rotation_on_top_of_existing_rotate() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(build_pdf(&["alpha"], Some(90)).into()).unwrap();

        let bytes = engine.write_document(&[OutputPage::new(handle, 0, Rotation::R90)]).unwrap();
        let dicts = output_page_dicts(&bytes);
        assert_eq!(dicts[0].get(b"Rotate").unwrap().as_i64().unwrap(), 180);

        // A further 270 wraps the total back to zero, which is omitted.
        let bytes = engine.write_document(&[OutputPage::new(handle, 0, Rotation::R270)]).unwrap();
        let dicts = output_page_dicts(&bytes);
        assert!(dicts[0].get(b"Rotate").is_err());
    }

    #[test]
    fn write_document_duplicates_a_source_page() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha", "bravo"]).into()).unwrap();

        let bytes = engine
            .write_document(&[
                OutputPage::new(handle, 0, Rotation::R0),
                OutputPage::new(handle, 0, Rotation::R180),
            ])
            .unwrap();

        let mut reopened = LopdfEngine::new();
        let out = reopened.open(bytes.into()).unwrap();
        assert_eq!(reopened.page_count(out).unwrap(), 2);
        assert!(reopened.extract_text(out, 0).unwrap().text.contains("alpha"));
        assert!(reopened.extract_text(out, 1).unwrap().text.contains("alpha"));
    }

    #[test]
    fn write_document_merges_pages_from_two_sources() {
        let mut engine = LopdfEngine::new();
        let left = engine.open(pdf_with_pages(&["alpha"]).into()).unwrap();
        let right = engine.open(pdf_with_pages(&["zulu", "yankee"]).into()).unwrap();

        let bytes = engine
            .write_document(&[
                OutputPage::new(right, 1, Rotation::R0),
                OutputPage::new(left, 0, Rotation::R0),
                OutputPage::new(right, 0, Rotation::R0),
            ])
            .unwrap();

        let mut reopened = LopdfEngine::new();
        let out = reopened.open(bytes.into()).unwrap();
        assert_eq!(reopened.page_count(out).unwrap(), 3);
        assert!(reopened.extract_text(out, 0).unwrap().text.contains("yankee"));
        assert!(reopened.extract_text(out, 1).unwrap().text.contains("alpha"));
        assert!(reopened.extract_text(out, 2).unwrap().text.contains("zulu"));
    }

    #[test]
    fn write_document_rejects_empty_and_out_of_range_requests() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha"]).into()).unwrap();

        assert!(matches!(engine.write_document(&[]), Err(EngineError::Backend(_))));

        let err = engine.write_document(&[OutputPage::new(handle, 7, Rotation::R0)]).unwrap_err();
        assert!(matches!(err, EngineError::PageOutOfRange { page: 7, page_count: 1 }));
    }

    #[test]
    fn close_invalidates_the_handle() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(pdf_with_pages(&["alpha"]).into()).unwrap();

        engine.close(handle).unwrap();
        assert!(matches!(engine.page_count(handle), Err(EngineError::InvalidHandle(_))));
    }
}
