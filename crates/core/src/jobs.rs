//! Background job execution and result delivery.
//!
//! Workers run against the shared engine and post their results to the
//! owning session's channel. Nothing here writes into the cache or the
//! search index: the session absorbs completions on its own thread, where
//! it can check that the page still exists and the document generation
//! still matches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use quire_cache::RenderKey;
use quire_doc_model::{PageUid, SourceId};
use quire_pdf_engine::{PageText, PdfEngine, RgbaImage};
use quire_scheduler::{CancellationToken, Generation, Job, JobKind, JobRequest};
use quire_search::{OcrOutcome, OcrProvider};

use crate::source::SourceHandle;

/// Source-to-handle table shared with the worker threads. Grows when pages
/// from another document are merged in, shrinks only when the session's
/// document is replaced.
pub(crate) type SourceMap = Arc<Mutex<HashMap<SourceId, SourceHandle>>>;

/// One finished background job, as posted to the session's channel.
#[derive(Debug)]
pub(crate) struct JobCompletion {
    pub uid: PageUid,
    pub generation: Generation,
    pub payload: JobPayload,
}

#[derive(Debug)]
pub(crate) enum JobPayload {
    Render { key: RenderKey, image: Arc<RgbaImage> },
    NativeText { text: PageText },
    Ocr { outcome: OcrOutcome },
    Failed { kind: JobKind, error: String },
}

/// Runs one job to completion. Returns `None` when the job was cancelled
/// mid-flight or its source is no longer open; there is nothing useful to
/// report in either case.
pub(crate) fn execute_job(
    engine: &Mutex<dyn PdfEngine + Send>,
    ocr: &dyn OcrProvider,
    sources: &Mutex<HashMap<SourceId, SourceHandle>>,
    job: &Job,
    token: &CancellationToken,
) -> Option<JobCompletion> {
    let page = job.request.page();
    let handle = sources.lock().unwrap().get(&page.source_id()).map(SourceHandle::handle)?;

    let payload = match job.request {
        JobRequest::Render { resolution, .. } => {
            let result = engine.lock().unwrap().render_page(
                handle,
                page.source_page_index(),
                page.rotation(),
                resolution,
            );
            if token.is_cancelled() {
                return None;
            }
            match result {
                Ok(image) => JobPayload::Render {
                    key: RenderKey::new(page.uid(), page.rotation(), resolution),
                    image: Arc::new(image),
                },
                Err(err) => JobPayload::Failed { kind: JobKind::Render, error: err.to_string() },
            }
        }
        JobRequest::ExtractText { .. } => {
            let result = engine.lock().unwrap().extract_text(handle, page.source_page_index());
            if token.is_cancelled() {
                return None;
            }
            match result {
                Ok(text) => JobPayload::NativeText { text },
                Err(err) => {
                    JobPayload::Failed { kind: JobKind::ExtractText, error: err.to_string() }
                }
            }
        }
        JobRequest::Ocr { resolution, .. } => {
            let rendered = engine.lock().unwrap().render_page(
                handle,
                page.source_page_index(),
                page.rotation(),
                resolution,
            );
            if token.is_cancelled() {
                return None;
            }
            match rendered {
                Ok(image) => match ocr.recognize(&image) {
                    Ok(outcome) => JobPayload::Ocr { outcome },
                    Err(err) => JobPayload::Failed { kind: JobKind::Ocr, error: err.to_string() },
                },
                Err(err) => JobPayload::Failed { kind: JobKind::Ocr, error: err.to_string() },
            }
        }
    };

    Some(JobCompletion { uid: page.uid(), generation: job.generation, payload })
}
