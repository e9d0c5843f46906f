//! Several open documents sharing one PDF backend, with an active-document
//! notion and cross-document operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use quire_diff::{DiffConfig, DiffResult};
use quire_doc_model::PageUid;
use quire_pdf_engine::{default_engine, OpenSource};
use quire_search::{DisabledOcr, OcrProvider};
use tracing::info;

use crate::error::SessionError;
use crate::session::{Session, SessionConfig, SharedEngine};

pub type DocumentId = u64;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("no open document with id {0}")]
    NotFound(DocumentId),
    #[error("document {0} cannot be merged with itself")]
    SameDocument(DocumentId),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// All open documents. Sessions created here share one engine, which is
/// what lets pages merge across documents.
pub struct Workspace {
    engine: SharedEngine,
    ocr: Arc<dyn OcrProvider>,
    sessions: HashMap<DocumentId, Session>,
    active: Option<DocumentId>,
    next_id: DocumentId,
    config: SessionConfig,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Workspace {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            engine: Arc::new(Mutex::new(default_engine())),
            ocr: Arc::new(DisabledOcr),
            sessions: HashMap::new(),
            active: None,
            next_id: 1,
            config,
        }
    }

    /// Installs an OCR backend for documents opened after this call.
    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = ocr;
        self
    }

    /// Opens a document and returns its id. The first document opened
    /// becomes active.
    pub fn open(&mut self, source: impl Into<OpenSource>) -> Result<DocumentId, WorkspaceError> {
        let session = Session::open(
            source,
            Arc::clone(&self.engine),
            Arc::clone(&self.ocr),
            self.config.clone(),
        )?;

        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(id, session);
        if self.active.is_none() {
            self.active = Some(id);
        }

        info!(id, open = self.sessions.len(), "opened document");
        Ok(id)
    }

    /// Closes a document, dropping its caches and stopping its workers.
    /// Closing the active document leaves no document active.
    pub fn close(&mut self, id: DocumentId) -> Result<(), WorkspaceError> {
        if self.sessions.remove(&id).is_none() {
            return Err(WorkspaceError::NotFound(id));
        }
        if self.active == Some(id) {
            self.active = None;
        }

        info!(id, open = self.sessions.len(), "closed document");
        Ok(())
    }

    pub fn get(&self, id: DocumentId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: DocumentId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn active_id(&self) -> Option<DocumentId> {
        self.active
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.and_then(|id| self.sessions.get(&id))
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        match self.active {
            Some(id) => self.sessions.get_mut(&id),
            None => None,
        }
    }

    pub fn set_active(&mut self, id: DocumentId) -> Result<(), WorkspaceError> {
        if !self.sessions.contains_key(&id) {
            return Err(WorkspaceError::NotFound(id));
        }
        self.active = Some(id);
        Ok(())
    }

    /// Open document ids, ascending.
    pub fn ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Copies pages from `source` into `target` at `at_index`, returning
    /// the uids minted for the copies. The source document is unchanged.
    pub fn merge(
        &mut self,
        target: DocumentId,
        source: DocumentId,
        uids: &[PageUid],
        at_index: usize,
    ) -> Result<Vec<PageUid>, WorkspaceError> {
        if target == source {
            return Err(WorkspaceError::SameDocument(target));
        }

        // Take the source session out so both can be borrowed at once.
        let source_session = match self.sessions.remove(&source) {
            Some(session) => session,
            None => return Err(WorkspaceError::NotFound(source)),
        };
        let outcome = match self.sessions.get_mut(&target) {
            Some(target_session) => target_session
                .merge_from(&source_session, uids, at_index)
                .map_err(WorkspaceError::from),
            None => Err(WorkspaceError::NotFound(target)),
        };
        self.sessions.insert(source, source_session);

        outcome
    }

    /// Compares two open documents page by page.
    pub fn compare(
        &self,
        left: DocumentId,
        right: DocumentId,
        config: DiffConfig,
    ) -> Result<DiffResult, WorkspaceError> {
        let left_session = self.get(left).ok_or(WorkspaceError::NotFound(left))?;
        let right_session = self.get(right).ok_or(WorkspaceError::NotFound(right))?;

        Ok(left_session.compare_with(right_session, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{build_pdf, drain_until, test_config};
    use quire_diff::PageStatus;

    fn indexed(workspace: &mut Workspace, id: DocumentId) {
        let session = workspace.get_mut(id).unwrap();
        session.index_all();
        drain_until(session, 5_000, |session, _| {
            session.index().len() == session.page_count()
        });
    }

    #[test]
    fn test_open_tracks_active_document() {
        let mut workspace = Workspace::new(test_config());
        assert!(workspace.is_empty());

        let first = workspace.open(build_pdf(&["Alpha"])).unwrap();
        let second = workspace.open(build_pdf(&["Beta", "Gamma"])).unwrap();

        assert_eq!(workspace.len(), 2);
        assert_eq!(workspace.ids(), vec![first, second]);
        assert_eq!(workspace.active_id(), Some(first));
        assert_eq!(workspace.active().unwrap().page_count(), 1);

        workspace.set_active(second).unwrap();
        assert_eq!(workspace.active().unwrap().page_count(), 2);

        assert!(matches!(workspace.set_active(999), Err(WorkspaceError::NotFound(999))));
    }

    #[test]
    fn test_close_clears_active() {
        let mut workspace = Workspace::new(test_config());
        let first = workspace.open(build_pdf(&["Alpha"])).unwrap();
        let second = workspace.open(build_pdf(&["Beta"])).unwrap();

        workspace.close(first).unwrap();
        assert!(workspace.active_id().is_none());
        assert_eq!(workspace.ids(), vec![second]);

        assert!(matches!(workspace.close(first), Err(WorkspaceError::NotFound(_))));
    }

    #[test]
    fn test_merge_copies_pages_between_documents() {
        let mut workspace = Workspace::new(test_config());
        let target = workspace.open(build_pdf(&["Alpha", "Beta"])).unwrap();
        let source = workspace.open(build_pdf(&["Gamma"])).unwrap();
        let wanted = workspace.get(source).unwrap().page_order()[0];

        let created = workspace.merge(target, source, &[wanted], 2).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(workspace.get(target).unwrap().page_count(), 3);
        assert_eq!(workspace.get(source).unwrap().page_count(), 1);

        let bytes = workspace.get(target).unwrap().extract_all().unwrap();
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        assert!(doc.extract_text(&[3]).unwrap().contains("Gamma"));
    }

    #[test]
    fn test_closing_the_source_keeps_merged_pages_alive() {
        let mut workspace = Workspace::new(test_config());
        let target = workspace.open(build_pdf(&["Alpha"])).unwrap();
        let source = workspace.open(build_pdf(&["Beta"])).unwrap();
        let wanted = workspace.get(source).unwrap().page_order()[0];

        workspace.merge(target, source, &[wanted], 1).unwrap();
        workspace.close(source).unwrap();

        let bytes = workspace.get(target).unwrap().extract_all().unwrap();
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert!(doc.extract_text(&[2]).unwrap().contains("Beta"));
    }

    #[test]
    fn test_merge_rejects_bad_ids() {
        let mut workspace = Workspace::new(test_config());
        let only = workspace.open(build_pdf(&["Alpha"])).unwrap();
        let uid = workspace.get(only).unwrap().page_order()[0];

        assert!(matches!(
            workspace.merge(only, only, &[uid], 0),
            Err(WorkspaceError::SameDocument(_))
        ));
        assert!(matches!(
            workspace.merge(only, 42, &[uid], 0),
            Err(WorkspaceError::NotFound(42))
        ));
        assert!(matches!(
            workspace.merge(42, only, &[uid], 0),
            Err(WorkspaceError::NotFound(42))
        ));
        assert_eq!(workspace.get(only).unwrap().page_count(), 1);
    }

    #[test]
    fn test_compare_aligns_by_extracted_text() {
        let mut workspace = Workspace::new(test_config());
        let left = workspace
            .open(build_pdf(&["Chapter one body text", "Chapter two body text"]))
            .unwrap();
        let right = workspace
            .open(build_pdf(&[
                "Chapter one body text",
                "Chapter two body text",
                "A brand new appendix",
            ]))
            .unwrap();

        indexed(&mut workspace, left);
        indexed(&mut workspace, right);

        let result = workspace.compare(left, right, DiffConfig::default()).unwrap();
        assert_eq!(result.summary.unchanged, 2);
        assert_eq!(result.summary.added, 1);
        assert_eq!(result.summary.removed, 0);
        assert_eq!(result.pages.last().unwrap().status, PageStatus::Added);

        assert!(matches!(
            workspace.compare(left, 17, DiffConfig::default()),
            Err(WorkspaceError::NotFound(17))
        ));
    }
}
