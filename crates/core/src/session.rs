//! One open document: arrangement state, caches, and background work.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quire_cache::{CacheBudget, CachedRender, RenderCache, RenderKey};
use quire_diff::{average_hash, DiffConfig, DiffEngine, DiffResult, PageFingerprint};
use quire_doc_model::{
    DocumentModel, EditEffects, History, ModelError, Mutation, PageRef, PageUid, Rotation,
    SourceId, DEFAULT_UNDO_LIMIT,
};
use quire_pdf_engine::{
    default_engine, DocumentHandle, EngineError, OpenSource, OutputPage, PdfEngine, RgbaImage,
};
use quire_scheduler::{
    default_worker_count, Generation, JobExecutor, JobId, JobKind, JobRequest, JobScheduler,
    WorkerPool, DEFAULT_POLL_INTERVAL,
};
use quire_search::{DisabledOcr, OcrProvider, SearchConfig, SearchHit, SearchIndex};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::jobs::{execute_job, JobCompletion, JobPayload, SourceMap};
use crate::source::SourceHandle;

/// PDF backend shared between a session's owning thread and its workers.
/// Sessions that exchange pages must share one engine, or neither can
/// resolve the other's source handles.
pub type SharedEngine = Arc<Mutex<dyn PdfEngine + Send>>;

pub const DEFAULT_PREVIEW_DPI: u32 = 150;
pub const DEFAULT_OCR_DPI: u32 = 300;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Resolution for preview renders requested without an explicit dpi.
    pub preview_dpi: u32,
    /// Resolution pages are rasterized at before optical recognition.
    pub ocr_dpi: u32,
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub cache_budget: CacheBudget,
    pub search: SearchConfig,
    pub undo_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preview_dpi: DEFAULT_PREVIEW_DPI,
            ocr_dpi: DEFAULT_OCR_DPI,
            worker_count: default_worker_count(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cache_budget: CacheBudget::default(),
            search: SearchConfig::default(),
            undo_limit: DEFAULT_UNDO_LIMIT,
        }
    }
}

impl SessionConfig {
    pub fn with_preview_dpi(mut self, dpi: u32) -> Self {
        self.preview_dpi = dpi.max(1);
        self
    }

    pub fn with_ocr_dpi(mut self, dpi: u32) -> Self {
        self.ocr_dpi = dpi.max(1);
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cache_budget(mut self, budget: CacheBudget) -> Self {
        self.cache_budget = budget;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_undo_limit(mut self, limit: usize) -> Self {
        self.undo_limit = limit.max(1);
        self
    }
}

/// Answer to a render request.
#[derive(Debug, Clone)]
pub enum RenderRequest {
    /// The bitmap was already cached; no job was queued.
    Cached(CachedRender),
    /// A background render was queued under this job id.
    Scheduled(JobId),
}

/// Answer to a text extraction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRequest {
    Indexed,
    Scheduled(JobId),
}

/// What a drained background result did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RenderReady { uid: PageUid, rotation: Rotation, resolution: u32 },
    TextIndexed { uid: PageUid, needs_ocr: bool },
    OcrApplied { uid: PageUid },
    /// A render or extraction failed. These never abort anything; the page
    /// just keeps whatever state it had.
    JobFailed { uid: PageUid, kind: JobKind, error: String },
    /// The result belonged to a removed page or an earlier document
    /// generation and was discarded without touching any state.
    ResultDropped { uid: PageUid },
}

/// An open document with its full working state.
///
/// All structural mutation happens through `&mut self` on the owning
/// thread. Rendering, text extraction, and OCR run on the session's worker
/// pool and report back through an internal channel; call [`drain_events`]
/// regularly to absorb finished work into the cache and search index.
///
/// [`drain_events`]: Session::drain_events
pub struct Session {
    model: DocumentModel,
    history: History,
    cache: RenderCache,
    index: SearchIndex,
    scheduler: Arc<JobScheduler>,
    pool: Option<WorkerPool>,
    engine: SharedEngine,
    sources: SourceMap,
    generation: Generation,
    completions: Receiver<JobCompletion>,
    path: Option<PathBuf>,
    config: SessionConfig,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("pages", &self.model.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens a document on a shared engine. Encrypted files are rejected
    /// with [`SessionError::Encrypted`] before any state is created.
    pub fn open(
        source: impl Into<OpenSource>,
        engine: SharedEngine,
        ocr: Arc<dyn OcrProvider>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let source = source.into();
        let path = source_path(&source);

        let handle = SourceHandle::new(Arc::clone(&engine), open_handle(&engine, source)?);
        let page_count = engine
            .lock()
            .unwrap()
            .page_count(handle.handle())
            .map_err(|err| SessionError::Load(err.to_string()))?;

        let source_id = SourceId(handle.handle().raw());
        let sources: SourceMap = Arc::new(Mutex::new(HashMap::from([(source_id, handle)])));
        let scheduler = Arc::new(JobScheduler::new());
        let (sender, completions) = mpsc::channel();
        let pool = spawn_workers(
            &config,
            Arc::clone(&scheduler),
            Arc::clone(&engine),
            ocr,
            Arc::clone(&sources),
            sender,
        );

        info!(pages = page_count, ?path, "opened document");

        Ok(Self {
            model: DocumentModel::from_source(source_id, page_count),
            history: History::with_limit(config.undo_limit),
            cache: RenderCache::new(config.cache_budget),
            index: SearchIndex::new(config.search),
            scheduler,
            pool: Some(pool),
            engine,
            sources,
            generation: 1,
            completions,
            path,
            config,
        })
    }

    /// Opens a file with a private engine and no OCR provider.
    pub fn open_path(
        path: impl AsRef<Path>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let engine: SharedEngine = Arc::new(Mutex::new(default_engine()));
        Self::open(path.as_ref(), engine, Arc::new(DisabledOcr), config)
    }

    /// Swaps in a different document, keeping the worker pool alive.
    ///
    /// The generation advances and outstanding jobs are cancelled, so late
    /// results from the old document are recognized and dropped. A failure
    /// to open the new source leaves the session untouched.
    pub fn replace_document(
        &mut self,
        source: impl Into<OpenSource>,
    ) -> Result<(), SessionError> {
        let source = source.into();
        let path = source_path(&source);

        let handle = SourceHandle::new(Arc::clone(&self.engine), open_handle(&self.engine, source)?);
        let page_count = self
            .engine
            .lock()
            .unwrap()
            .page_count(handle.handle())
            .map_err(|err| SessionError::Load(err.to_string()))?;
        let source_id = SourceId(handle.handle().raw());

        self.generation += 1;
        self.scheduler.cancel_generations_before(self.generation);

        // Dropping the old entries closes their handles, unless another
        // session still references them through a merge.
        {
            let mut sources = self.sources.lock().unwrap();
            sources.clear();
            sources.insert(source_id, handle);
        }

        self.model = DocumentModel::from_source(source_id, page_count);
        self.history.clear();
        self.cache.clear();
        self.index.clear();
        self.path = path;

        info!(pages = page_count, generation = self.generation, "replaced document");
        Ok(())
    }

    pub fn model(&self) -> &DocumentModel {
        &self.model
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn page_count(&self) -> usize {
        self.model.len()
    }

    pub fn page_order(&self) -> Vec<PageUid> {
        self.model.uid_order()
    }

    pub fn dirty(&self) -> bool {
        self.model.dirty()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_label(&self) -> Option<&'static str> {
        self.history.undo_label()
    }

    /// True when no background job is queued or running.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn select<I>(&mut self, uids: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = PageUid>,
    {
        self.model.set_selection(uids)?;
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.model.clear_selection();
    }

    pub fn selection_in_order(&self) -> Vec<PageUid> {
        self.model.selection_in_order()
    }

    /// Moves pages so their block starts at `target_index`. See
    /// [`DocumentModel::reorder`] for the exact ordering rules.
    pub fn reorder(&mut self, moved: &[PageUid], target_index: usize) -> Result<(), SessionError> {
        let mutation = self.model.reorder(moved, target_index)?;
        self.finish_mutation(mutation);
        Ok(())
    }

    /// Adds `delta_degrees` (a multiple of 90) to each page's rotation.
    pub fn rotate(&mut self, uids: &[PageUid], delta_degrees: i32) -> Result<(), SessionError> {
        let mutation = self.model.rotate(uids, delta_degrees)?;
        self.finish_mutation(mutation);
        Ok(())
    }

    /// Duplicates pages in place and returns the new uids. Copies inherit
    /// the original's indexed text.
    pub fn duplicate(&mut self, uids: &[PageUid]) -> Result<Vec<PageUid>, SessionError> {
        let mutation = self.model.duplicate(uids)?;
        let created = mutation.created.clone();
        self.finish_mutation(mutation);
        Ok(created)
    }

    /// Removes pages. Their cached renders, index entries, and background
    /// jobs go with them.
    pub fn remove(&mut self, uids: &[PageUid]) -> Result<(), SessionError> {
        let mutation = self.model.remove(uids)?;
        self.finish_mutation(mutation);
        Ok(())
    }

    /// Copies pages from another session into this document at `at_index`,
    /// returning the new uids. Both sessions must share an engine. Text the
    /// other session had indexed for those pages travels along.
    pub fn merge_from(
        &mut self,
        other: &Session,
        uids: &[PageUid],
        at_index: usize,
    ) -> Result<Vec<PageUid>, SessionError> {
        let originals = other.model.in_display_order(uids)?;
        let mutation = self.model.insert_from(&other.model, uids, at_index)?;

        {
            let other_sources = other.sources.lock().unwrap();
            let mut sources = self.sources.lock().unwrap();
            for page in &originals {
                if let Some(handle) = other_sources.get(&page.source_id()) {
                    sources.entry(page.source_id()).or_insert_with(|| handle.clone());
                }
            }
        }

        for (original, copy) in originals.iter().zip(mutation.created.iter()) {
            if let Some(entry) = other.index.entry(original.uid()) {
                self.index.import_entry(*copy, entry.clone());
            }
        }

        let created = mutation.created.clone();
        self.finish_mutation(mutation);
        Ok(created)
    }

    pub fn undo(&mut self) -> Result<bool, SessionError> {
        match self.history.undo(&mut self.model)? {
            Some(effects) => {
                self.apply_effects(&effects);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool, SessionError> {
        match self.history.redo(&mut self.model)? {
            Some(effects) => {
                self.apply_effects(&effects);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the cached bitmap if one exists, otherwise queues a render.
    pub fn request_render(&self, uid: PageUid, dpi: u32) -> Result<RenderRequest, SessionError> {
        let page = self.page(uid)?;
        let key = RenderKey::new(uid, page.rotation(), dpi);
        if let Some(cached) = self.cache.get(key) {
            return Ok(RenderRequest::Cached(cached));
        }

        let (job, _) = self
            .scheduler
            .submit(JobRequest::Render { page, resolution: dpi }, self.generation);
        Ok(RenderRequest::Scheduled(job))
    }

    pub fn request_preview(&self, uid: PageUid) -> Result<RenderRequest, SessionError> {
        self.request_render(uid, self.config.preview_dpi)
    }

    /// Queues text extraction for one page unless it is already indexed.
    pub fn request_text(&self, uid: PageUid) -> Result<TextRequest, SessionError> {
        let page = self.page(uid)?;
        if self.index.contains(uid) {
            return Ok(TextRequest::Indexed);
        }

        let (job, _) = self.scheduler.submit(JobRequest::ExtractText { page }, self.generation);
        Ok(TextRequest::Scheduled(job))
    }

    /// Queues text extraction for every page not yet indexed and returns
    /// how many jobs were scheduled.
    pub fn index_all(&self) -> usize {
        let mut scheduled = 0;
        for page in self.model.pages() {
            if !self.index.contains(page.uid()) {
                self.scheduler.submit(JobRequest::ExtractText { page: *page }, self.generation);
                scheduled += 1;
            }
        }
        scheduled
    }

    /// Queues optical recognition for one page. Recognition never starts on
    /// its own; this call is the only trigger. Repeated requests while a
    /// job is pending collapse into it.
    pub fn run_ocr(&self, uid: PageUid) -> Result<JobId, SessionError> {
        let page = self.page(uid)?;
        let (job, _) = self
            .scheduler
            .submit(JobRequest::Ocr { page, resolution: self.config.ocr_dpi }, self.generation);
        Ok(job)
    }

    /// Whether a page's native text looks too thin to search. `None` until
    /// the page has been indexed.
    pub fn needs_ocr(&self, uid: PageUid) -> Option<bool> {
        self.index.needs_ocr(uid)
    }

    /// Every hit for `query` across indexed pages, in display order.
    pub fn find_all(&self, query: &str) -> Vec<SearchHit> {
        let order = self.model.uid_order();
        self.index.search(query, &order).collect()
    }

    /// Absorbs finished background work. Results for pages that left the
    /// working set, or from an earlier document generation, are dropped.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(completion) = self.completions.try_recv() {
            events.push(self.absorb(completion));
        }
        events
    }

    /// Writes the current arrangement to `path` and clears the dirty flag.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let bytes = self.assemble(&self.model.uid_order())?;
        std::fs::write(path.as_ref(), bytes)?;
        self.model.mark_saved();
        self.path = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    /// Assembles a new document from the given pages, in display order.
    pub fn extract(&self, uids: &[PageUid]) -> Result<Vec<u8>, SessionError> {
        self.assemble(uids)
    }

    /// Assembles the whole document as currently arranged.
    pub fn extract_all(&self) -> Result<Vec<u8>, SessionError> {
        self.assemble(&self.model.uid_order())
    }

    /// Fingerprints for comparing this document against another, enriched
    /// with indexed text and, where a preview render is cached, a
    /// perceptual hash.
    pub fn fingerprints(&self) -> Vec<PageFingerprint> {
        self.model
            .pages()
            .iter()
            .map(|page| {
                let mut fingerprint = PageFingerprint::new(page);
                if let Some(text) = self.index.text(page.uid()) {
                    fingerprint = fingerprint.with_text(text);
                }
                let key = RenderKey::new(page.uid(), page.rotation(), self.config.preview_dpi);
                if let Some(cached) = self.cache.get(key) {
                    fingerprint = fingerprint.with_visual_hash(average_hash(&cached.image));
                }
                fingerprint
            })
            .collect()
    }

    /// Compares this document's pages against another session's.
    pub fn compare_with(&self, other: &Session, config: DiffConfig) -> DiffResult {
        DiffEngine::new(config).compare(&self.fingerprints(), &other.fingerprints())
    }

    /// Renders one page synchronously, reusing the cache when it can.
    pub(crate) fn render_now(&self, page: PageRef, dpi: u32) -> Result<RgbaImage, SessionError> {
        let key = RenderKey::new(page.uid(), page.rotation(), dpi);
        if let Some(cached) = self.cache.get(key) {
            return Ok((*cached.image).clone());
        }

        let handle = self.handle_for(page.source_id())?;
        let image = self.engine.lock().unwrap().render_page(
            handle,
            page.source_page_index(),
            page.rotation(),
            dpi,
        )?;
        Ok(image)
    }

    fn page(&self, uid: PageUid) -> Result<PageRef, SessionError> {
        self.model
            .pages()
            .iter()
            .find(|page| page.uid() == uid)
            .copied()
            .ok_or_else(|| ModelError::UnknownUid(uid).into())
    }

    fn handle_for(&self, source_id: SourceId) -> Result<DocumentHandle, SessionError> {
        self.sources
            .lock()
            .unwrap()
            .get(&source_id)
            .map(SourceHandle::handle)
            .ok_or(SessionError::UnknownSource(source_id))
    }

    fn assemble(&self, uids: &[PageUid]) -> Result<Vec<u8>, SessionError> {
        let pages = self.model.in_display_order(uids)?;

        let mut output = Vec::with_capacity(pages.len());
        for page in &pages {
            let handle = self.handle_for(page.source_id())?;
            output.push(OutputPage::new(handle, page.source_page_index(), page.rotation()));
        }

        let bytes = self.engine.lock().unwrap().write_document(&output)?;
        Ok(bytes)
    }

    /// Applies a mutation's side effects to the cache, the index, and the
    /// job queue, and records its undo entry.
    fn finish_mutation(&mut self, mutation: Mutation) {
        for (original, copy) in &mutation.duplicated {
            self.index.copy_entry(*original, *copy);
        }
        for uid in &mutation.rotated {
            self.cache.invalidate(*uid);
        }
        for uid in &mutation.removed {
            self.cache.invalidate(*uid);
            self.index.remove(*uid);
            self.scheduler.cancel_for_uid(*uid);
        }
        if let Some(entry) = mutation.entry {
            self.history.record(entry);
        }
    }

    fn apply_effects(&mut self, effects: &EditEffects) {
        for uid in &effects.rotated {
            self.cache.invalidate(*uid);
        }
        for uid in &effects.removed {
            self.cache.invalidate(*uid);
            self.index.remove(*uid);
            self.scheduler.cancel_for_uid(*uid);
        }
        // Reinserted pages render and index lazily on the next request.
    }

    fn absorb(&mut self, completion: JobCompletion) -> SessionEvent {
        let uid = completion.uid;
        if completion.generation != self.generation || !self.model.contains(uid) {
            debug!(%uid, "dropping stale background result");
            return SessionEvent::ResultDropped { uid };
        }

        match completion.payload {
            JobPayload::Render { key, image } => {
                self.cache.put(key, image);
                SessionEvent::RenderReady {
                    uid,
                    rotation: key.rotation,
                    resolution: key.resolution,
                }
            }
            JobPayload::NativeText { text } => {
                self.index.set_native_text(uid, &text);
                let needs_ocr = self.index.needs_ocr(uid).unwrap_or(false);
                SessionEvent::TextIndexed { uid, needs_ocr }
            }
            JobPayload::Ocr { outcome } => {
                self.index.apply_ocr(uid, &outcome);
                SessionEvent::OcrApplied { uid }
            }
            JobPayload::Failed { kind, error } => {
                warn!(%uid, ?kind, %error, "background job failed");
                SessionEvent::JobFailed { uid, kind, error }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        // Source handles close themselves once the last reference drops;
        // pages merged into other sessions keep theirs open.
    }
}

fn source_path(source: &OpenSource) -> Option<PathBuf> {
    match source {
        OpenSource::Path(path) => Some(path.clone()),
        OpenSource::Bytes(_) => None,
    }
}

fn open_handle(engine: &SharedEngine, source: OpenSource) -> Result<DocumentHandle, SessionError> {
    match engine.lock().unwrap().open(source) {
        Ok(handle) => Ok(handle),
        Err(EngineError::Encrypted) => Err(SessionError::Encrypted),
        Err(err) => Err(SessionError::Load(err.to_string())),
    }
}

fn spawn_workers(
    config: &SessionConfig,
    scheduler: Arc<JobScheduler>,
    engine: SharedEngine,
    ocr: Arc<dyn OcrProvider>,
    sources: SourceMap,
    sender: mpsc::Sender<JobCompletion>,
) -> WorkerPool {
    let executor: JobExecutor = Arc::new(move |job, token| {
        if let Some(completion) = execute_job(&engine, ocr.as_ref(), &sources, job, token) {
            let _ = sender.send(completion);
        }
    });

    WorkerPool::start_with_poll_interval(
        scheduler,
        config.worker_count,
        executor,
        config.poll_interval,
    )
}
